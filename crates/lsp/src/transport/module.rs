//! Embedded-module transport.
//!
//! Runs the analysis server as an in-process virtual-machine module that
//! speaks the same framed protocol over byte pipes. The engine binding
//! lives behind [`ModuleRuntime`]; this transport only requires the
//! adapter contract below and supplies the codec, the pump and the
//! lifecycle policy.
//!
//! Stdout chunks reach us through a native callback whose buffer may be a
//! view into the module's shared linear memory. Such a view is not valid
//! beyond the callback, so the chunk is copied into a private buffer
//! before the frame decoder ever sees it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::codec::FrameDecoder;
use crate::types::{AnyNotification, AnyRequest, AnyResponse, Message, RequestId};
use crate::{Error, Result, codec};

use super::pump::{self, MessageSink, Outbound};
use super::{ServerConfig, ServerId, StartedServer, Transport};

/// A running module instance.
///
/// Implementations wrap a concrete virtual-machine engine. All methods are
/// synchronous; the engine is expected to buffer stdin internally.
pub trait ModuleInstance: Send {
	/// Register the stdout sink.
	///
	/// The slice handed to `callback` is only valid for the duration of
	/// the call and may alias shared memory; receivers must copy.
	fn on_stdout(&mut self, callback: Box<dyn FnMut(&[u8]) + Send>);

	/// Write bytes to the module's stdin.
	fn write_stdin(&mut self, bytes: &[u8]) -> Result<()>;

	/// Forcibly terminate the module.
	fn terminate(&mut self);
}

/// An instantiated module plus its exit signal.
pub struct StartedModule {
	/// The instance itself.
	pub instance: Box<dyn ModuleInstance>,
	/// Resolves with the exit code when the module's run completes.
	pub exit: oneshot::Receiver<i32>,
}

/// Factory for module instances.
#[async_trait]
pub trait ModuleRuntime: Send + Sync {
	/// Compile and instantiate the module.
	///
	/// Fails with [`Error::Module`] when compilation or instantiation
	/// fails.
	async fn instantiate(&self, cfg: &ServerConfig) -> Result<StartedModule>;
}

/// Transport that runs each server as an embedded module.
pub struct ModuleTransport {
	runtime: Arc<dyn ModuleRuntime>,
	servers: RwLock<HashMap<ServerId, ModuleServer>>,
	next_request_id: AtomicI64,
}

struct ModuleServer {
	instance: Arc<Mutex<Box<dyn ModuleInstance>>>,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	exit: oneshot::Receiver<i32>,
}

struct ModuleSink {
	instance: Arc<Mutex<Box<dyn ModuleInstance>>>,
}

impl MessageSink for ModuleSink {
	async fn send(&mut self, msg: &Message) -> Result<()> {
		let framed = codec::encode(msg)?;
		self.instance.lock().write_stdin(&framed)
	}
}

impl ModuleTransport {
	/// Create a transport over the given module engine.
	pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
		Self {
			runtime,
			servers: RwLock::new(HashMap::new()),
			next_request_id: AtomicI64::new(0),
		}
	}

	fn outbound_for(&self, server: ServerId) -> Result<mpsc::UnboundedSender<Outbound>> {
		self.servers
			.read()
			.get(&server)
			.map(|s| s.outbound_tx.clone())
			.ok_or(Error::ServiceStopped)
	}
}

#[async_trait]
impl Transport for ModuleTransport {
	async fn start(&self, cfg: ServerConfig) -> Result<StartedServer> {
		let id = cfg.id;

		tracing::info!(server = %id, "instantiating embedded analysis server module");

		let StartedModule { mut instance, exit } = self.runtime.instantiate(&cfg).await?;

		let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
		instance.on_stdout(Box::new(move |buf| {
			// Copy inside the callback; the view dies when it returns.
			let _ = chunk_tx.send(buf.to_vec());
		}));
		let instance = Arc::new(Mutex::new(instance));

		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (event_tx, events) = mpsc::unbounded_channel();

		tokio::spawn(async move {
			let mut decoder = FrameDecoder::new();
			while let Some(chunk) = chunk_rx.recv().await {
				decoder.extend(&chunk);
				loop {
					match decoder.next_message() {
						Ok(Some(msg)) => {
							if inbound_tx.send(Ok(msg)).is_err() {
								return;
							}
						}
						Ok(None) => break,
						Err(e) => {
							let _ = inbound_tx.send(Err(e));
							return;
						}
					}
				}
			}
		});

		tokio::spawn(pump::run_pump(
			id,
			ModuleSink {
				instance: instance.clone(),
			},
			inbound_rx,
			outbound_rx,
			event_tx,
		));

		self.servers.write().insert(
			id,
			ModuleServer {
				instance,
				outbound_tx,
				exit,
			},
		);

		Ok(StartedServer { id, events })
	}

	async fn request(
		&self,
		server: ServerId,
		mut req: AnyRequest,
		timeout: Duration,
		token: &CancellationToken,
	) -> Result<AnyResponse> {
		let outbound_tx = self.outbound_for(server)?;
		req.id = RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed));
		pump::dispatch_request(&outbound_tx, req, timeout, token).await
	}

	fn notify(&self, server: ServerId, notif: AnyNotification) -> Result<()> {
		self.outbound_for(server)?
			.send(Outbound::Notify { notif })
			.map_err(|_| Error::ServiceStopped)
	}

	async fn stop(&self, server: ServerId, timeout: Duration) {
		let Some(srv) = self.servers.write().remove(&server) else {
			return;
		};
		drop(srv.outbound_tx);

		match tokio::time::timeout(timeout, srv.exit).await {
			Ok(Ok(code)) => {
				tracing::debug!(server = %server, code, "analysis server module exited");
			}
			Ok(Err(_)) => {
				tracing::debug!(server = %server, "module exit signal dropped by the engine");
			}
			Err(_) => {
				tracing::warn!(server = %server, "module ignored shutdown; terminating");
				srv.instance.lock().terminate();
			}
		}
	}
}
