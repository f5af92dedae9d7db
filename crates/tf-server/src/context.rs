//! Shared application context.
//!
//! [`AppContext`] is handed to every worker, the reaper and the route
//! handlers. It wraps the store, configuration, file manager, tool registry
//! and callback client in `Arc`s so clones are cheap.

use std::sync::Arc;

use tf_av::{FileManager, ToolRegistry};
use tf_core::config::Config;
use tf_db::StatusStore;

use crate::callback::CallbackClient;

#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn StatusStore>,
    pub config: Arc<Config>,
    pub files: Arc<FileManager>,
    pub tools: Arc<ToolRegistry>,
    pub callbacks: Arc<CallbackClient>,
}

impl AppContext {
    /// Build the context from its parts; file handling and callback delivery
    /// are derived from `config`.
    pub fn new(store: Arc<dyn StatusStore>, config: Config, tools: ToolRegistry) -> Self {
        let files = FileManager::new(
            config.files.temp_dir.clone(),
            config.files.keep_output_files,
        );
        let callbacks = CallbackClient::new(config.callback.timeout());
        Self {
            store,
            config: Arc::new(config),
            files: Arc::new(files),
            tools: Arc::new(tools),
            callbacks: Arc::new(callbacks),
        }
    }
}
