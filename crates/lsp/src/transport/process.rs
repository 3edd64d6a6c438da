//! Subprocess transport: spawns the analysis server as a child process
//! and talks length-framed JSON-RPC over its piped stdio.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{AnyNotification, AnyRequest, AnyResponse, Message, RequestId};
use crate::{Error, Result, codec};

use super::pump::{self, MessageSink, Outbound};
use super::{ServerConfig, ServerId, StartedServer, Transport};

/// Transport that runs each server as a child process.
#[derive(Default)]
pub struct ProcessTransport {
	servers: RwLock<HashMap<ServerId, ServerProcess>>,
	next_request_id: AtomicI64,
}

struct ServerProcess {
	child: Child,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
}

struct StdinSink {
	stdin: ChildStdin,
}

impl MessageSink for StdinSink {
	async fn send(&mut self, msg: &Message) -> Result<()> {
		let framed = codec::encode(msg)?;
		self.stdin.write_all(&framed).await?;
		self.stdin.flush().await?;
		Ok(())
	}
}

impl ProcessTransport {
	/// Create an empty transport.
	pub fn new() -> Self {
		Self::default()
	}

	fn outbound_for(&self, server: ServerId) -> Result<mpsc::UnboundedSender<Outbound>> {
		self.servers
			.read()
			.get(&server)
			.map(|p| p.outbound_tx.clone())
			.ok_or(Error::ServiceStopped)
	}
}

#[async_trait]
impl Transport for ProcessTransport {
	async fn start(&self, cfg: ServerConfig) -> Result<StartedServer> {
		let id = cfg.id;
		let command_display = cfg.command.display().to_string();

		tracing::info!(server = %id, command = %command_display, "starting analysis server process");

		let mut cmd = Command::new(&cfg.command);
		cmd.args(&cfg.args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true);
		for (key, value) in &cfg.env {
			cmd.env(key, value);
		}
		if let Some(root) = &cfg.root {
			cmd.current_dir(root);
		}

		let mut child = cmd.spawn().map_err(|e| Error::Spawn {
			command: command_display.clone(),
			reason: e.to_string(),
		})?;

		let stdin = child.stdin.take().ok_or_else(|| Error::Spawn {
			command: command_display.clone(),
			reason: "failed to capture stdin".into(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
			command: command_display,
			reason: "failed to capture stdout".into(),
		})?;

		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (event_tx, events) = mpsc::unbounded_channel();

		tokio::spawn(async move {
			let mut reader = BufReader::new(stdout);
			loop {
				match codec::read_message(&mut reader).await {
					Ok(Some(msg)) => {
						if inbound_tx.send(Ok(msg)).is_err() {
							break;
						}
					}
					Ok(None) => break,
					Err(e) => {
						let _ = inbound_tx.send(Err(e));
						break;
					}
				}
			}
		});

		tokio::spawn(pump::run_pump(
			id,
			StdinSink { stdin },
			inbound_rx,
			outbound_rx,
			event_tx,
		));

		self.servers
			.write()
			.insert(id, ServerProcess { child, outbound_tx });

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
		let Some(mut proc) = self.servers.write().remove(&server) else {
			return;
		};
		// Closing the queue lets the pump wind down while we wait.
		drop(proc.outbound_tx);

		match tokio::time::timeout(timeout, proc.child.wait()).await {
			Ok(Ok(status)) => {
				tracing::debug!(server = %server, %status, "analysis server exited");
			}
			Ok(Err(e)) => {
				tracing::warn!(server = %server, error = %e, "failed to await analysis server exit");
			}
			Err(_) => {
				tracing::warn!(server = %server, "analysis server ignored shutdown; killing");
				if let Err(e) = proc.child.start_kill() {
					tracing::warn!(server = %server, error = %e, "failed to kill analysis server");
				}
				let _ = proc.child.wait().await;
			}
		}
	}
}
