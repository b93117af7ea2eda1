use crate::identity::IdentityHandle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Keeps a mounted bootstrap alive. Dropping it unmounts the bootstrap.
pub struct BootstrapHandle {
    handle: JoinHandle<anyhow::Result<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    identity: IdentityHandle,
}

impl BootstrapHandle {
    pub(crate) fn new(
        handle: JoinHandle<anyhow::Result<()>>,
        shutdown: oneshot::Sender<()>,
        identity: IdentityHandle,
    ) -> Self {
        Self {
            handle,
            shutdown: Some(shutdown),
            identity,
        }
    }

    pub fn identity(&self) -> IdentityHandle {
        self.identity.clone()
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await??;
        Ok(())
    }
}
