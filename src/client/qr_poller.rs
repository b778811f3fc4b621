//! QR approval dialog: create a session, show its URL, poll until resolved.
//!
//! Two timers share one `select!` loop: the status poll (every 2 s) and the
//! countdown (every 1 s from 300 s). The countdown is a local guard and ends
//! the dialog as `expired` whatever the server says. Dropping the `run` future
//! abandons the session without any server call; the server lets it lapse.
//!
//! Phase changes are published on a `watch` channel for whoever renders the
//! dialog.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use super::{flow::PendingAuth, AuthApi, ClientError, Session};
use crate::{api::types::QrSessionStatusResponse, store::QrSessionStatus};

type StatusRequest<'a> =
    Pin<Box<dyn Future<Output = Result<QrSessionStatusResponse, ClientError>> + Send + 'a>>;

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Countdown length. Reaching zero forces `Expired`.
    pub timeout: Duration,
    /// Pause on the approved screen before handing the session back.
    pub approved_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            approved_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QrPhase {
    Loading,
    Pending {
        qr_url: String,
        remaining_seconds: u64,
    },
    Approved,
    Rejected,
    Expired,
    Error(String),
}

#[derive(Debug)]
pub enum QrOutcome {
    Approved(Session),
    Rejected,
    Expired,
    Error(ClientError),
}

impl QrOutcome {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Approved(_) => "Login approved".to_string(),
            Self::Rejected => "Login was rejected".to_string(),
            Self::Expired => "QR code expired".to_string(),
            Self::Error(err) => err.to_string(),
        }
    }
}

pub struct QrPoller {
    api: Arc<dyn AuthApi>,
    config: PollerConfig,
    phase: watch::Sender<QrPhase>,
}

impl QrPoller {
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, config: PollerConfig) -> Self {
        let (phase, _) = watch::channel(QrPhase::Loading);
        Self { api, config, phase }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QrPhase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> QrPhase {
        self.phase.borrow().clone()
    }

    fn publish(&self, phase: QrPhase) {
        self.phase.send_replace(phase);
    }

    /// Drive one approval session until it reaches a terminal phase.
    pub async fn run(&self, pending: &PendingAuth) -> QrOutcome {
        self.publish(QrPhase::Loading);
        let created = match self
            .api
            .create_qr_session(&pending.user_id, pending.pending_token())
            .await
        {
            Ok(created) => created,
            Err(err) => {
                warn!("failed to create QR session: {err}");
                self.publish(QrPhase::Error(err.to_string()));
                return QrOutcome::Error(err);
            }
        };

        let mut remaining = self.config.timeout.as_secs();
        self.publish(QrPhase::Pending {
            qr_url: created.qr_url.clone(),
            remaining_seconds: remaining,
        });

        let start = Instant::now();
        let mut poll = interval_at(start + self.config.poll_interval, self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let second = Duration::from_secs(1);
        let mut countdown = interval_at(start + second, second);

        // At most one status request is in flight. It is a branch of its own
        // so a hung request never holds up the countdown.
        let mut in_flight: Option<StatusRequest<'_>> = None;

        loop {
            tokio::select! {
                // On a shared tick the countdown wins, so the boundary is exact.
                biased;

                _ = countdown.tick() => {
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        info!("QR session timed out locally");
                        self.publish(QrPhase::Expired);
                        return QrOutcome::Expired;
                    }
                    self.phase.send_modify(|phase| {
                        if let QrPhase::Pending { remaining_seconds, .. } = phase {
                            *remaining_seconds = remaining;
                        }
                    });
                }
                result = async {
                    match in_flight.as_mut() {
                        Some(request) => request.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    match result {
                        Ok(status) => match status.status {
                            QrSessionStatus::Pending => {}
                            QrSessionStatus::Approved => {
                                let Some(token) = status.token else {
                                    let err = ClientError::Protocol(
                                        "approved session without a token".to_string(),
                                    );
                                    self.publish(QrPhase::Error(err.to_string()));
                                    return QrOutcome::Error(err);
                                };
                                self.publish(QrPhase::Approved);
                                sleep(self.config.approved_delay).await;
                                return QrOutcome::Approved(Session {
                                    token,
                                    expires_at: status.expires_at,
                                    user: status.user,
                                });
                            }
                            QrSessionStatus::Rejected => {
                                self.publish(QrPhase::Rejected);
                                return QrOutcome::Rejected;
                            }
                            QrSessionStatus::Expired => {
                                self.publish(QrPhase::Expired);
                                return QrOutcome::Expired;
                            }
                        },
                        Err(err) => warn!("QR status poll failed, retrying: {err}"),
                    }
                }
                _ = poll.tick(), if in_flight.is_none() => {
                    in_flight = Some(self.api.qr_session_status(&created.session_token));
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        api::types::SecondFactorMode,
        client::testing::{FakeApi, PENDING_TOKEN},
    };

    fn pending() -> PendingAuth {
        PendingAuth::new(
            "user-1".to_string(),
            SecondFactorMode::Qr,
            PENDING_TOKEN.to_string(),
        )
    }

    fn poller(api: &Arc<FakeApi>) -> QrPoller {
        QrPoller::new(api.clone(), PollerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn approval_at_ten_seconds_completes_after_the_delay() {
        let statuses: Vec<Result<QrSessionStatus, ClientError>> = (0..5)
            .map(|poll| {
                Ok(if poll < 4 {
                    QrSessionStatus::Pending
                } else {
                    QrSessionStatus::Approved
                })
            })
            .collect();
        let api = Arc::new(FakeApi::new(None).with_statuses(statuses));
        let poller = poller(&api);

        let start = Instant::now();
        let session = match poller.run(&pending()).await {
            QrOutcome::Approved(session) => session,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(session.token, "session-qr");
        assert!(session.user.is_some());
        assert_eq!(start.elapsed(), Duration::from_millis(11_500));
        assert_eq!(api.status_calls(), 5);
        assert_eq!(poller.phase(), QrPhase::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_status_expires_at_the_countdown_boundary() {
        let api = Arc::new(FakeApi::new(None));
        let poller = poller(&api);

        let start = Instant::now();
        let outcome = poller.run(&pending()).await;
        assert!(matches!(outcome, QrOutcome::Expired));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        // Polls at 2 s .. 298 s; the 300 s tick loses to the countdown.
        assert_eq!(api.status_calls(), 149);
        assert_eq!(poller.phase(), QrPhase::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_published_while_pending() {
        let api = Arc::new(FakeApi::new(None));
        let poller = Arc::new(poller(&api));
        let phases = poller.subscribe();

        let task = tokio::spawn({
            let poller = poller.clone();
            async move { poller.run(&pending()).await }
        });
        sleep(Duration::from_millis(3500)).await;
        let phase = phases.borrow().clone();
        match phase {
            QrPhase::Pending {
                qr_url,
                remaining_seconds,
            } => {
                assert!(qr_url.contains("/qr-approve/"));
                assert_eq!(remaining_seconds, 297);
            }
            other => panic!("unexpected phase {other:?}"),
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_and_server_expiry_are_terminal() {
        let api = Arc::new(FakeApi::new(None).with_statuses(vec![Ok(QrSessionStatus::Rejected)]));
        assert!(matches!(poller(&api).run(&pending()).await, QrOutcome::Rejected));
        assert_eq!(api.status_calls(), 1);

        let api = Arc::new(FakeApi::new(None).with_statuses(vec![Ok(QrSessionStatus::Expired)]));
        assert!(matches!(poller(&api).run(&pending()).await, QrOutcome::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_retried_on_the_next_tick() {
        let api = Arc::new(FakeApi::new(None).with_statuses(vec![
            Err(ClientError::Rejected {
                status: 502,
                message: "Bad Gateway".to_string(),
            }),
            Err(ClientError::Protocol("garbled".to_string())),
            Ok(QrSessionStatus::Approved),
        ]));
        let start = Instant::now();
        let outcome = poller(&api).run(&pending()).await;
        assert!(matches!(outcome, QrOutcome::Approved(_)));
        assert_eq!(start.elapsed(), Duration::from_millis(7_500));
    }

    #[tokio::test(start_paused = true)]
    async fn creation_failure_is_an_error_phase() {
        let api = Arc::new(FakeApi::new(None).failing_create());
        let poller = poller(&api);
        let outcome = poller.run(&pending()).await;
        assert!(matches!(outcome, QrOutcome::Error(_)));
        assert_eq!(poller.phase(), QrPhase::Error("Server error".to_string()));
        assert_eq!(api.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_dialog_stops_polling() {
        let api = Arc::new(FakeApi::new(None));
        let poller = poller(&api);
        let result = tokio::time::timeout(Duration::from_millis(4500), poller.run(&pending())).await;
        assert!(result.is_err());
        assert_eq!(api.status_calls(), 2);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(api.status_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_request_does_not_delay_expiry() {
        let api = Arc::new(FakeApi::new(None).with_status_delay(Duration::from_secs(30)));
        let poller = poller(&api);

        let start = Instant::now();
        let outcome = poller.run(&pending()).await;
        assert!(matches!(outcome, QrOutcome::Expired));
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        // One request at a time: sent at 2 s, 32 s, ... 272 s.
        assert_eq!(api.status_calls(), 10);
        assert_eq!(poller.phase(), QrPhase::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_keeps_running_during_a_slow_request() {
        let api = Arc::new(FakeApi::new(None).with_status_delay(Duration::from_secs(30)));
        let poller = Arc::new(poller(&api));
        let phases = poller.subscribe();

        let task = tokio::spawn({
            let poller = poller.clone();
            async move { poller.run(&pending()).await }
        });
        sleep(Duration::from_millis(10_500)).await;
        assert_eq!(api.status_calls(), 1);
        let phase = phases.borrow().clone();
        match phase {
            QrPhase::Pending {
                remaining_seconds, ..
            } => assert_eq!(remaining_seconds, 290),
            other => panic!("unexpected phase {other:?}"),
        }
        task.abort();
    }
}
