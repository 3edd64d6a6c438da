use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, FrameDecoder};
use crate::types::{AnyRequest, Message, RequestId, METHOD_NOT_FOUND};
use crate::{Error, Result};

use super::*;

type Responder = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

/// In-memory module that decodes frames off its stdin and answers through
/// a single reused buffer, mimicking a shared-memory stdout view.
struct FakeModule {
	decoder: FrameDecoder,
	stdout: Option<Box<dyn FnMut(&[u8]) + Send>>,
	shared_buf: Vec<u8>,
	responder: Responder,
	inbox: Arc<Mutex<Vec<Message>>>,
	terminated: Arc<AtomicBool>,
	honor_terminate: bool,
	exit_tx: Option<oneshot::Sender<i32>>,
}

impl ModuleInstance for FakeModule {
	fn on_stdout(&mut self, callback: Box<dyn FnMut(&[u8]) + Send>) {
		self.stdout = Some(callback);
	}

	fn write_stdin(&mut self, bytes: &[u8]) -> Result<()> {
		self.decoder.extend(bytes);
		while let Some(msg) = self.decoder.next_message()? {
			self.inbox.lock().push(msg.clone());
			for reply in (self.responder)(&msg) {
				let framed = codec::encode(&reply)?;
				// Reuse one buffer across callbacks so a receiver that kept
				// the previous view would decode garbage.
				self.shared_buf.clear();
				self.shared_buf.extend_from_slice(&framed);
				if let Some(cb) = &mut self.stdout {
					cb(&self.shared_buf);
				}
			}
		}
		Ok(())
	}

	fn terminate(&mut self) {
		self.terminated.store(true, Ordering::SeqCst);
		if self.honor_terminate
			&& let Some(tx) = self.exit_tx.take()
		{
			let _ = tx.send(1);
		}
	}
}

struct FakeRuntime {
	responder: Responder,
	inbox: Arc<Mutex<Vec<Message>>>,
	terminated: Arc<AtomicBool>,
	honor_terminate: bool,
}

#[async_trait::async_trait]
impl ModuleRuntime for FakeRuntime {
	async fn instantiate(&self, _cfg: &ServerConfig) -> Result<StartedModule> {
		let (exit_tx, exit) = oneshot::channel();
		Ok(StartedModule {
			instance: Box::new(FakeModule {
				decoder: FrameDecoder::new(),
				stdout: None,
				shared_buf: Vec::new(),
				responder: self.responder.clone(),
				inbox: self.inbox.clone(),
				terminated: self.terminated.clone(),
				honor_terminate: self.honor_terminate,
				exit_tx: Some(exit_tx),
			}),
			exit,
		})
	}
}

struct Fixture {
	transport: ModuleTransport,
	inbox: Arc<Mutex<Vec<Message>>>,
	terminated: Arc<AtomicBool>,
}

fn fixture(responder: Responder) -> Fixture {
	fixture_with(responder, true)
}

fn fixture_with(responder: Responder, honor_terminate: bool) -> Fixture {
	let inbox = Arc::new(Mutex::new(Vec::new()));
	let terminated = Arc::new(AtomicBool::new(false));
	let runtime = FakeRuntime {
		responder,
		inbox: inbox.clone(),
		terminated: terminated.clone(),
		honor_terminate,
	};
	Fixture {
		transport: ModuleTransport::new(Arc::new(runtime)),
		inbox,
		terminated,
	}
}

fn request(method: &str) -> AnyRequest {
	AnyRequest {
		id: RequestId::Number(0),
		method: method.into(),
		params: serde_json::json!({}),
	}
}

fn reply_ok(req: &AnyRequest) -> Message {
	Message::Response(crate::types::AnyResponse {
		id: req.id.clone(),
		result: Some(serde_json::json!("ok")),
		error: None,
	})
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
	for _ in 0..200 {
		if cond() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached in time");
}

#[tokio::test]
async fn request_reply_round_trip() {
	let fx = fixture(Arc::new(|msg| match msg {
		Message::Request(req) => vec![reply_ok(req)],
		_ => Vec::new(),
	}));

	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(1), "noir-lsp"))
		.await
		.unwrap();

	let resp = fx
		.transport
		.request(
			started.id,
			request("tests"),
			Duration::from_secs(1),
			&CancellationToken::new(),
		)
		.await
		.unwrap();
	assert_eq!(resp.result, Some(serde_json::json!("ok")));
	assert!(resp.error.is_none());
}

#[tokio::test]
async fn notifications_surface_as_events() {
	let fx = fixture(Arc::new(|msg| match msg {
		Message::Request(req) => vec![
			Message::Notification(crate::types::AnyNotification {
				method: "tests/update".into(),
				params: serde_json::json!({"package": "main", "uri": "file:///p/"}),
			}),
			reply_ok(req),
		],
		_ => Vec::new(),
	}));

	let mut started = fx
		.transport
		.start(ServerConfig::new(ServerId(2), "noir-lsp"))
		.await
		.unwrap();

	fx.transport
		.request(
			started.id,
			request("poke"),
			Duration::from_secs(1),
			&CancellationToken::new(),
		)
		.await
		.unwrap();

	let event = started.events.recv().await.unwrap();
	match event {
		TransportEvent::Notification(notif) => assert_eq!(notif.method, "tests/update"),
		other => panic!("expected notification, got {other:?}"),
	}
}

#[tokio::test]
async fn cancellation_propagates_cancel_request() {
	// Never answers, so the request stays in flight until cancelled.
	let fx = fixture(Arc::new(|_| Vec::new()));

	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(3), "noir-lsp"))
		.await
		.unwrap();

	let token = CancellationToken::new();
	let cancel = token.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(20)).await;
		cancel.cancel();
	});

	let err = fx
		.transport
		.request(started.id, request("hang"), Duration::from_secs(5), &token)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Cancelled));

	let inbox = fx.inbox.clone();
	wait_for(move || {
		inbox.lock().iter().any(|msg| {
			matches!(msg, Message::Notification(n) if n.method == "$/cancelRequest")
		})
	})
	.await;
}

#[tokio::test]
async fn late_response_after_cancel_is_dropped() {
	// Replies to "hang" only once the cancel notification arrives.
	let pending_id: Arc<Mutex<Option<RequestId>>> = Arc::new(Mutex::new(None));
	let responder_pending = pending_id.clone();
	let fx = fixture(Arc::new(move |msg| match msg {
		Message::Request(req) if req.method == "hang" => {
			*responder_pending.lock() = Some(req.id.clone());
			Vec::new()
		}
		Message::Request(req) => vec![reply_ok(req)],
		Message::Notification(n) if n.method == "$/cancelRequest" => {
			let id = responder_pending.lock().take().expect("cancel without request");
			vec![Message::Response(crate::types::AnyResponse {
				id,
				result: Some(serde_json::json!("too late")),
				error: None,
			})]
		}
		_ => Vec::new(),
	}));

	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(4), "noir-lsp"))
		.await
		.unwrap();

	let token = CancellationToken::new();
	token.cancel();
	let err = fx
		.transport
		.request(started.id, request("hang"), Duration::from_secs(5), &token)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::Cancelled));

	// The pump must survive the orphan response and keep serving.
	let resp = fx
		.transport
		.request(
			started.id,
			request("tests"),
			Duration::from_secs(1),
			&CancellationToken::new(),
		)
		.await
		.unwrap();
	assert_eq!(resp.result, Some(serde_json::json!("ok")));
}

#[tokio::test]
async fn stop_force_terminates_after_timeout() {
	let fx = fixture(Arc::new(|_| Vec::new()));
	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(5), "noir-lsp"))
		.await
		.unwrap();

	// The module never exits by itself, so stop must time out and kill it.
	fx.transport
		.stop(started.id, Duration::from_millis(50))
		.await;
	assert!(fx.terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stop_resolves_even_when_module_ignores_termination() {
	let fx = fixture_with(Arc::new(|_| Vec::new()), false);
	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(6), "noir-lsp"))
		.await
		.unwrap();

	tokio::time::timeout(
		Duration::from_secs(2),
		fx.transport.stop(started.id, Duration::from_millis(50)),
	)
	.await
	.expect("stop must always resolve");

	// A second stop on the same server is a no-op.
	fx.transport
		.stop(started.id, Duration::from_millis(10))
		.await;
}

#[tokio::test]
async fn server_initiated_request_is_rejected() {
	let fx = fixture(Arc::new(|msg| match msg {
		Message::Request(req) if req.method == "poke" => vec![
			Message::Request(AnyRequest {
				id: RequestId::String("srv-1".into()),
				method: "window/unknown".into(),
				params: serde_json::Value::Null,
			}),
			reply_ok(req),
		],
		_ => Vec::new(),
	}));

	let started = fx
		.transport
		.start(ServerConfig::new(ServerId(7), "noir-lsp"))
		.await
		.unwrap();

	fx.transport
		.request(
			started.id,
			request("poke"),
			Duration::from_secs(1),
			&CancellationToken::new(),
		)
		.await
		.unwrap();

	let inbox = fx.inbox.clone();
	wait_for(move || {
		inbox.lock().iter().any(|msg| {
			matches!(
				msg,
				Message::Response(resp)
					if resp.error.as_ref().is_some_and(|e| e.code == METHOD_NOT_FOUND)
			)
		})
	})
	.await;
}

#[tokio::test]
async fn missing_binary_is_a_start_error() {
	let transport = ProcessTransport::new();
	let err = transport
		.start(ServerConfig::new(
			ServerId(8),
			"/nonexistent/bin/nargo-does-not-exist",
		))
		.await
		.unwrap_err();
	match err {
		Error::Spawn { command, .. } => assert!(command.contains("nargo-does-not-exist")),
		other => panic!("expected spawn error, got {other}"),
	}
}
