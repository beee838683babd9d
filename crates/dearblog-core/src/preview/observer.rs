use serde::Serialize;

/// Exit details of a preview server that ended without [`stop`] being called.
///
/// [`stop`]: super::PreviewManager::stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnexpectedExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl From<UnexpectedExit> for crate::BlogError {
    fn from(exit: UnexpectedExit) -> Self {
        crate::BlogError::UnexpectedExit { code: exit.code }
    }
}

/// Receives lifecycle and output notifications from a [`PreviewManager`].
///
/// Every method is invoked from [`PreviewManager::dispatch_next`],
/// [`PreviewManager::try_dispatch`] or [`PreviewManager::stop`], on the task
/// that owns the manager. Calls never overlap.
///
/// [`PreviewManager`]: super::PreviewManager
/// [`PreviewManager::dispatch_next`]: super::PreviewManager::dispatch_next
/// [`PreviewManager::try_dispatch`]: super::PreviewManager::try_dispatch
/// [`PreviewManager::stop`]: super::PreviewManager::stop
pub trait PreviewObserver {
    /// A chunk of server output. Stdout and stderr share this sink.
    fn on_output(&mut self, text: &str);

    /// Fired once per session, a fixed delay after spawn. The server may not
    /// be accepting connections yet.
    fn on_ready(&mut self, url: &str);

    fn on_stopped_unexpectedly(&mut self, exit: &UnexpectedExit);

    fn on_stopped_by_user(&mut self);
}
