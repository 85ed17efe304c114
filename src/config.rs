//! Bridge configuration.

/// Options fixed when a [`Bridge`](crate::Bridge) is created.
///
/// ```
/// use natbridge::BridgeConfig;
///
/// let config = BridgeConfig::new()
///     .preload_library("Foundation")
///     .with_layout_validation(true);
/// assert_eq!(config.preload_libraries(), ["Foundation".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    validate_layouts: bool,
    preload_libraries: Vec<String>,
    search_all_libraries: bool,
    cache_method_lookups: bool,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every struct descriptor appearing in a bound signature.
    /// On by default in debug builds.
    #[must_use]
    pub fn with_layout_validation(mut self, validate: bool) -> Self {
        self.validate_layouts = validate;
        self
    }

    /// Load `library` when the bridge is created instead of on first use.
    #[must_use]
    pub fn preload_library(mut self, library: impl Into<String>) -> Self {
        self.preload_libraries.push(library.into());
        self
    }

    pub fn preload_libraries_from<I, S>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preload_libraries
            .extend(libraries.into_iter().map(Into::into));
        self
    }

    /// Search every loaded library for symbols declared without one. When
    /// off, only the process image is searched.
    #[must_use]
    pub fn with_search_all_libraries(mut self, search_all: bool) -> Self {
        self.search_all_libraries = search_all;
        self
    }

    /// Cache method implementations per (class, selector).
    #[must_use]
    pub fn with_method_cache(mut self, cache: bool) -> Self {
        self.cache_method_lookups = cache;
        self
    }

    pub fn validate_layouts(&self) -> bool {
        self.validate_layouts
    }

    pub fn preload_libraries(&self) -> &[String] {
        &self.preload_libraries
    }

    pub fn search_all_libraries(&self) -> bool {
        self.search_all_libraries
    }

    pub fn cache_method_lookups(&self) -> bool {
        self.cache_method_lookups
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            validate_layouts: cfg!(debug_assertions),
            preload_libraries: Vec::new(),
            search_all_libraries: true,
            cache_method_lookups: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.validate_layouts(), cfg!(debug_assertions));
        assert!(config.preload_libraries().is_empty());
        assert!(config.search_all_libraries());
        assert!(config.cache_method_lookups());
    }

    #[test]
    fn builder() {
        let config = BridgeConfig::new()
            .preload_libraries_from(["CoreFoundation", "Foundation"])
            .with_search_all_libraries(false)
            .with_method_cache(false);
        assert_eq!(config.preload_libraries().len(), 2);
        assert!(!config.search_all_libraries());
        assert!(!config.cache_method_lookups());
    }
}
