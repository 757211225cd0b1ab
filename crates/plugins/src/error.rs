use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A plugin failed to initialize; the first `initialized` plugins did.
    #[error("plugin {plugin} failed to initialize: {source}")]
    Init {
        plugin: String,
        initialized: usize,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
