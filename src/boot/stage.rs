/// States of one boot invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootStage {
    Init,
    AgentReady,
    VersionChecked,
    Swapping,
    /// Control left this instance for good.
    SwapSucceeded,
    SwapFailed,
    CacheCheck,
    CachePopulated,
    AssetsLoaded,
    Ready,
}

impl BootStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Init => "Loading Service",
            Self::AgentReady | Self::VersionChecked => "Checking Updates",
            Self::Swapping => "Updating Client",
            Self::SwapSucceeded => "Applying Update",
            Self::SwapFailed => "Error Updating",
            Self::CacheCheck => "Downloading Game Files",
            Self::CachePopulated => "Loading Game",
            Self::AssetsLoaded => "Starting",
            Self::Ready => "Ready",
        }
    }

    /// Slice `[start, end]` of the unified progress bar owned by this stage.
    pub fn span(self) -> (f64, f64) {
        match self {
            Self::Init => (0.0, 0.05),
            Self::AgentReady => (0.05, 0.1),
            Self::VersionChecked => (0.1, 0.1),
            Self::Swapping => (0.1, 0.4),
            Self::SwapSucceeded | Self::SwapFailed => (0.4, 0.4),
            Self::CacheCheck => (0.4, 0.75),
            Self::CachePopulated => (0.75, 0.95),
            Self::AssetsLoaded => (0.95, 1.0),
            Self::Ready => (1.0, 1.0),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SwapSucceeded | Self::Ready)
    }

    /// Whether `self` may directly follow `prev`.
    pub fn can_follow(self, prev: BootStage) -> bool {
        use BootStage::*;
        matches!(
            (prev, self),
            (Init, AgentReady)
                | (AgentReady, VersionChecked)
                | (VersionChecked, Swapping)
                | (VersionChecked, CacheCheck)
                | (Swapping, SwapSucceeded)
                | (Swapping, SwapFailed)
                | (SwapFailed, CacheCheck)
                | (CacheCheck, CachePopulated)
                | (CachePopulated, AssetsLoaded)
                | (AssetsLoaded, Ready)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_are_ordered_along_happy_path() {
        let path = [
            BootStage::Init,
            BootStage::AgentReady,
            BootStage::VersionChecked,
            BootStage::Swapping,
            BootStage::SwapFailed,
            BootStage::CacheCheck,
            BootStage::CachePopulated,
            BootStage::AssetsLoaded,
            BootStage::Ready,
        ];
        for pair in path.windows(2) {
            assert!(pair[1].can_follow(pair[0]), "{:?} -> {:?}", pair[0], pair[1]);
            assert!(pair[0].span().1 <= pair[1].span().0 + f64::EPSILON);
        }
        assert_eq!(BootStage::Ready.span(), (1.0, 1.0));
    }

    #[test]
    fn test_no_swap_after_success_or_skip() {
        assert!(!BootStage::CacheCheck.can_follow(BootStage::SwapSucceeded));
        assert!(!BootStage::Swapping.can_follow(BootStage::SwapFailed));
        assert!(BootStage::SwapSucceeded.is_terminal());
    }
}
