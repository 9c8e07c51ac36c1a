use tokio::sync::watch;

/// Where a run learns that it should stop early.
#[derive(Debug, Clone, Default)]
pub enum Interrupt {
    /// SIGINT delivered to this process.
    #[default]
    CtrlC,
    /// Fired through the matching [`Trigger`].
    Manual(watch::Receiver<bool>),
}

/// Fires a manual [`Interrupt`].
#[derive(Debug)]
pub struct Trigger(watch::Sender<bool>);

impl Trigger {
    pub fn fire(&self) {
        self.0.send_replace(true);
    }
}

impl Interrupt {
    pub fn manual() -> (Trigger, Self) {
        let (tx, rx) = watch::channel(false);
        (Trigger(tx), Self::Manual(rx))
    }

    /// Resolves once the interrupt happened. Never resolves when it cannot happen.
    pub async fn wait(&self) {
        match self {
            Self::CtrlC => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::warn!("Cannot listen for Ctrl-C: {}", e);
                    futures::future::pending::<()>().await;
                }
            }
            Self::Manual(rx) => {
                let mut rx = rx.clone();
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        futures::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn manual_interrupt_wakes_every_waiter() {
        let (trigger, interrupt) = Interrupt::manual();
        let early = tokio::time::timeout(Duration::from_millis(50), interrupt.wait()).await;
        assert!(early.is_err());

        let waiter = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move { interrupt.wait().await })
        };
        trigger.fire();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        // already fired
        tokio::time::timeout(Duration::from_secs(5), interrupt.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_trigger_never_fires() {
        let (trigger, interrupt) = Interrupt::manual();
        drop(trigger);
        let res = tokio::time::timeout(Duration::from_millis(50), interrupt.wait()).await;
        assert!(res.is_err());
    }
}
