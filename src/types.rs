#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Catalog provider the poller talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Platform {
    Kaggle,
    #[value(name = "huggingface")]
    HuggingFace,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Kaggle, Platform::HuggingFace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kaggle => "kaggle",
            Platform::HuggingFace => "huggingface",
        }
    }
}

/// How the Hugging Face listing approximates "trending".
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HubSort {
    /// Most downloaded first, filtered by recency.
    #[value(name = "downloads")]
    Downloads,
    /// Most recently modified first, filtered by download count.
    #[value(name = "last-modified")]
    LastModified,
}

impl HubSort {
    pub fn as_query(&self) -> &'static str {
        match self {
            HubSort::Downloads => "downloads",
            HubSort::LastModified => "lastModified",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_match_cli_values() {
        use clap::ValueEnum;
        for platform in Platform::ALL {
            assert_eq!(Platform::from_str(platform.as_str(), false).unwrap(), platform);
        }
        assert_eq!(Platform::HuggingFace.as_str(), "huggingface");
    }

    #[test]
    fn test_hub_sort_query_values() {
        assert_eq!(HubSort::Downloads.as_query(), "downloads");
        assert_eq!(HubSort::LastModified.as_query(), "lastModified");
    }
}
