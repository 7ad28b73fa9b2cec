//! Time source and cancellable sleeping for admission waits.

use std::time::Duration;

use tokio::sync::watch;

pub use tokio::time::Instant;

use super::error::AdmissionError;

pub fn now() -> Instant {
    Instant::now()
}

/// Sleep for `wait`, returning early with `Cancelled` if shutdown is signalled.
///
/// A closed shutdown channel is treated as "never cancelled".
pub(crate) async fn sleep(
    wait: Duration,
    shutdown: Option<&mut watch::Receiver<bool>>,
) -> Result<(), AdmissionError> {
    let Some(shutdown) = shutdown else {
        tokio::time::sleep(wait).await;
        return Ok(());
    };

    let stopped = *shutdown.borrow();
    if stopped {
        return Err(AdmissionError::Cancelled);
    }

    let deadline = now() + wait;
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => Ok(()),
        // Only a bool survives the await; watch::Ref is not Send.
        stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
            if stopped {
                Err(AdmissionError::Cancelled)
            } else {
                tokio::time::sleep_until(deadline).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_without_shutdown() {
        let start = now();
        sleep(Duration::from_secs(5), None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_cancelled_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let start = now();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
            tx
        });

        let result = sleep(Duration::from_secs(30), Some(&mut rx)).await;
        assert!(matches!(result, Err(AdmissionError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(30));
        drop(handle.await.unwrap());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_sleep_future_is_send() {
        let (_tx, mut rx) = watch::channel(false);
        assert_send(&sleep(Duration::from_secs(1), Some(&mut rx)));
        assert_send(&sleep(Duration::from_secs(1), None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_sleeps_full_duration() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let start = now();
        sleep(Duration::from_secs(3), Some(&mut rx)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
