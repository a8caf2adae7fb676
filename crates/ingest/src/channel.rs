use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use darelay_resilience::{Dependency, Retrier};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::errors::{IngestError, IngestResult, ProcessError};
use crate::message::{Frames, IngestMessage};
use crate::panic::panic_message;
use crate::transport::{Connector, Transport};

/// Time a handler may run before it is aborted.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of the acknowledgement sent for a request that failed.
pub const ERROR_ACK_PREFIX: &str = "error: ";

/// Validates raw frames, logging and dropping malformed ones.
pub fn validate(frames: Frames) -> Option<IngestMessage> {
    IngestMessage::from_frames(frames)
        .inspect_err(|e| warn!(%e, "dropping malformed ingest message"))
        .ok()
}

/// One-part acknowledgement reporting `err` to a requester.
pub fn error_ack(err: impl std::fmt::Display) -> Vec<u8> {
    format!("{ERROR_ACK_PREFIX}{err}").into_bytes()
}

/// A single ingest transport with fault isolation around it.
pub struct IngestChannel<C: Connector> {
    connector: Arc<C>,
    retrier: Retrier,
    transport: AsyncMutex<Option<C::Transport>>,
    parent: CancellationToken,
    scope: Mutex<CancellationToken>,
    closed: AtomicBool,
    handler_timeout: Duration,
}

impl<C: Connector> std::fmt::Debug for IngestChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestChannel")
            .field("retrier", &self.retrier)
            .field("closed", &self.is_closed())
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> IngestChannel<C> {
    /// Creates an unconnected channel whose work is cancelled along with
    /// `parent`.
    pub fn new(connector: Arc<C>, parent: CancellationToken) -> Self {
        let retrier = Retrier::for_dependency(Dependency::Subscriber).with_cancellation(parent.clone());
        Self::with_retrier(connector, parent, retrier)
    }

    /// Creates an unconnected channel using a custom retrier for transport
    /// creation.
    pub fn with_retrier(connector: Arc<C>, parent: CancellationToken, retrier: Retrier) -> Self {
        let scope = parent.child_token();
        Self {
            connector,
            retrier,
            transport: AsyncMutex::new(None),
            parent,
            scope: Mutex::new(scope),
            closed: AtomicBool::new(false),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Overrides the handler timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    fn scope(&self) -> CancellationToken {
        self.scope.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn ensure_open(&self) -> IngestResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::Closed);
        }
        Ok(())
    }

    /// Connects as a subscriber of `topic` on `endpoint`.
    ///
    /// Creation is retried under the subscriber breaker. Once the attempts
    /// are exhausted the error is returned and should be treated as fatal.
    pub async fn subscribe(&self, endpoint: &str, topic: &[u8]) -> IngestResult<()> {
        self.ensure_open()?;
        let connector = &self.connector;
        let transport = self
            .retrier
            .run(move || connector.subscribe(endpoint, topic))
            .await
            .map_err(|e| IngestError::connect(endpoint, e))?;

        *self.transport.lock().await = Some(transport);
        info!(%endpoint, topic = %String::from_utf8_lossy(topic), "ingest subscribed");
        Ok(())
    }

    /// Binds a reply transport on `endpoint`.
    pub async fn reply(&self, endpoint: &str) -> IngestResult<()> {
        self.ensure_open()?;
        let connector = &self.connector;
        let transport = self
            .retrier
            .run(move || connector.reply(endpoint))
            .await
            .map_err(|e| IngestError::connect(endpoint, e))?;

        *self.transport.lock().await = Some(transport);
        info!(%endpoint, "ingest reply endpoint bound");
        Ok(())
    }

    /// Waits for the next well-formed message.
    ///
    /// Malformed frames are logged and skipped. On a reply transport the
    /// requester still gets an error acknowledgement for them. Returns
    /// `Ok(None)` when the channel is reset, closed or cancelled, or the peer
    /// goes away.
    pub async fn recv(&self) -> IngestResult<Option<IngestMessage>> {
        if self.is_closed() {
            return Ok(None);
        }

        let token = self.scope();
        let mut guard = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            guard = self.transport.lock() => guard,
        };
        let transport = guard.as_mut().ok_or(IngestError::NotConnected)?;

        loop {
            let frames = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                res = transport.recv_frames() => res?,
            };
            let Some(frames) = frames else {
                debug!("ingest transport ended");
                return Ok(None);
            };
            match IngestMessage::from_frames(frames) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    warn!(%e, "dropping malformed ingest message");
                    if transport.expects_reply() {
                        transport.send_frames(vec![error_ack(&e)]).await?;
                    }
                }
            }
        }
    }

    /// Sends the one-part acknowledgement for the current request on a reply
    /// transport.
    pub async fn acknowledge(&self, ack: Vec<u8>) -> IngestResult<()> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(IngestError::NotConnected)?;
        transport.send_frames(vec![ack]).await
    }

    /// Runs `handler` on its own task with a timeout and panic containment.
    ///
    /// A panic, a timeout or a reset of the channel all come back as
    /// [`ProcessError`] and never propagate into the caller.
    pub async fn process<F, Fut, T>(&self, msg: IngestMessage, handler: F) -> Result<T, ProcessError>
    where
        F: FnOnce(IngestMessage) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.scope();
        let task = tokio::spawn(async move { handler(msg).await });
        let abort = task.abort_handle();

        let res = tokio::select! {
            biased;
            _ = token.cancelled() => {
                abort.abort();
                return Err(ProcessError::Cancelled);
            }
            res = tokio::time::timeout(self.handler_timeout, task) => res,
        };

        match res {
            Err(_) => {
                abort.abort();
                warn!(timeout = ?self.handler_timeout, "ingest handler timed out");
                Err(ProcessError::Timeout(self.handler_timeout))
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                let info = panic_message(&*join_err.into_panic());
                error!(%info, "ingest handler panicked");
                Err(ProcessError::Panicked(info))
            }
            Ok(Err(_)) => Err(ProcessError::Cancelled),
            Ok(Ok(res)) => res.map_err(ProcessError::Handler),
        }
    }

    /// Tears down the transport and cancels outstanding work.
    ///
    /// The channel can be connected again afterwards. Calling this repeatedly
    /// is harmless.
    pub async fn reset(&self) {
        {
            let mut scope = self.scope.lock().unwrap_or_else(|e| e.into_inner());
            scope.cancel();
            *scope = self.parent.child_token();
        }
        if self.transport.lock().await.take().is_some() {
            debug!("ingest transport dropped");
        }
    }

    /// Like [`Self::reset`], but the channel cannot be reconnected.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("closing ingest channel");
        }
        self.scope().cancel();
        self.transport.lock().await.take();
    }

    /// Returns whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use darelay_resilience::{BreakerConfig, CircuitBreaker, RetryPolicy};

    use super::*;
    use crate::local::{ChannelConnector, ChannelTransport};

    fn channel() -> (Arc<ChannelConnector>, IngestChannel<ChannelConnector>) {
        let conn = Arc::new(ChannelConnector::new());
        let chan = IngestChannel::new(conn.clone(), CancellationToken::new());
        (conn, chan)
    }

    fn frames(parts: &[&[u8]]) -> Frames {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    async fn exploding(_msg: IngestMessage) -> anyhow::Result<()> {
        panic!("handler blew up")
    }

    async fn failing(_msg: IngestMessage) -> anyhow::Result<()> {
        anyhow::bail!("nope")
    }

    #[tokio::test]
    async fn recv_skips_malformed() {
        let (conn, chan) = channel();
        chan.subscribe("inproc://a", b"").await.unwrap();
        let publisher = conn.publisher("inproc://a");

        publisher.publish(frames(&[b"t", b"p"]));
        publisher.publish(frames(&[b"t", b"", b"s"]));
        publisher.publish(frames(&[b"t", b"good", b"s"]));

        let msg = chan.recv().await.unwrap().unwrap();
        assert_eq!(msg.payload(), b"good");
    }

    #[tokio::test]
    async fn recv_unconnected_errors() {
        let (_conn, chan) = channel();
        assert!(matches!(chan.recv().await, Err(IngestError::NotConnected)));
    }

    #[tokio::test]
    async fn reset_unblocks_recv_and_is_idempotent() {
        let (_conn, chan) = channel();
        let chan = Arc::new(chan);
        chan.subscribe("inproc://b", b"").await.unwrap();

        let waiter = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.recv().await })
        };
        tokio::task::yield_now().await;

        chan.reset().await;
        chan.reset().await;
        assert!(waiter.await.unwrap().unwrap().is_none());

        // Reconnects after a reset.
        chan.subscribe("inproc://b", b"").await.unwrap();
        assert!(!chan.is_closed());
    }

    #[tokio::test]
    async fn close_is_final() {
        let (_conn, chan) = channel();
        chan.close().await;
        chan.close().await;
        assert!(matches!(
            chan.subscribe("inproc://c", b"").await,
            Err(IngestError::Closed)
        ));
        assert!(chan.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn process_contains_panic() {
        let (_conn, chan) = channel();
        let msg = IngestMessage::from_frames(frames(&[b"t", b"p", b"s"])).unwrap();
        let res = chan.process(msg, exploding).await;
        assert!(matches!(res, Err(ProcessError::Panicked(info)) if info == "handler blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn process_times_out() {
        let (_conn, chan) = channel();
        let chan = chan.with_handler_timeout(Duration::from_secs(30));
        let msg = IngestMessage::from_frames(frames(&[b"t", b"p", b"s"])).unwrap();
        let res = chan
            .process(msg, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ProcessError::Timeout(_))));
    }

    #[tokio::test]
    async fn process_returns_handler_result() {
        let (_conn, chan) = channel();
        let msg = IngestMessage::from_frames(frames(&[b"t", b"abc", b"s"])).unwrap();
        let len = chan
            .process(msg, |m| async move { Ok(m.payload().len()) })
            .await
            .unwrap();
        assert_eq!(len, 3);

        let msg = IngestMessage::from_frames(frames(&[b"t", b"abc", b"s"])).unwrap();
        let res = chan.process(msg, failing).await;
        assert!(matches!(res, Err(ProcessError::Handler(_))));
    }

    #[tokio::test]
    async fn reply_acknowledges() {
        let (conn, chan) = channel();
        chan.reply("inproc://rep").await.unwrap();
        let requester = conn.requester("inproc://rep").unwrap();
        let req = tokio::spawn(async move { requester.request(frames(&[b"t", b"p", b"s"])).await });

        let msg = chan.recv().await.unwrap().unwrap();
        assert_eq!(msg.topic(), b"t");
        chan.acknowledge(b"ok".to_vec()).await.unwrap();
        assert_eq!(req.await.unwrap().unwrap(), vec![b"ok".to_vec()]);
    }

    #[tokio::test]
    async fn malformed_request_gets_error_ack() {
        let (conn, chan) = channel();
        chan.reply("inproc://req").await.unwrap();
        let requester = conn.requester("inproc://req").unwrap();

        let chan = Arc::new(chan);
        let receiver = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.recv().await })
        };

        let ack = tokio::time::timeout(Duration::from_secs(2), requester.request(frames(&[b"t", b"p"])))
            .await
            .expect("malformed request left unanswered")
            .unwrap();
        assert_eq!(ack.len(), 1);
        assert!(ack[0].starts_with(ERROR_ACK_PREFIX.as_bytes()));

        // The channel keeps serving well-formed requests.
        let req = tokio::spawn(async move { requester.request(frames(&[b"t", b"good", b"s"])).await });
        let msg = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(msg.payload(), b"good");
        chan.acknowledge(b"ok".to_vec()).await.unwrap();
        assert_eq!(req.await.unwrap().unwrap(), vec![b"ok".to_vec()]);
    }

    /// Fails the first `failures` connection attempts.
    #[derive(Debug)]
    struct FlakyConnector {
        inner: ChannelConnector,
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        type Transport = ChannelTransport;

        async fn subscribe(&self, endpoint: &str, topic: &[u8]) -> IngestResult<ChannelTransport> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(IngestError::connect(endpoint, "connection refused"));
            }
            self.inner.subscribe(endpoint, topic).await
        }

        async fn reply(&self, endpoint: &str) -> IngestResult<ChannelTransport> {
            self.inner.reply(endpoint).await
        }
    }

    fn flaky(failures: u32) -> (Arc<FlakyConnector>, IngestChannel<FlakyConnector>) {
        let conn = Arc::new(FlakyConnector {
            inner: ChannelConnector::new(),
            failures,
            attempts: AtomicU32::new(0),
        });
        let retrier = Retrier::new(
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30), 2.0),
            Arc::new(CircuitBreaker::new("subscriber", BreakerConfig::new(5, Duration::from_secs(30)))),
        );
        let chan = IngestChannel::with_retrier(conn.clone(), CancellationToken::new(), retrier);
        (conn, chan)
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_retries_transient_failures() {
        let (conn, chan) = flaky(2);
        chan.subscribe("inproc://d", b"").await.unwrap();
        assert_eq!(conn.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_surfaces_after_exhaustion() {
        let (conn, chan) = flaky(10);
        let err = chan.subscribe("inproc://e", b"").await.unwrap_err();
        assert!(matches!(err, IngestError::Connect { .. }));
        assert_eq!(conn.attempts.load(Ordering::SeqCst), 3);
    }
}
