pub mod boot_api;
