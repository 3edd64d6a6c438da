//! Message pump shared by both transports.
//!
//! One pump task per started server owns the pending-request map and the
//! write side of the wire. All outbound traffic goes through a single
//! queue, giving total write ordering; inbound messages arrive pre-decoded
//! on a channel fed by the transport's reader.

use std::collections::HashMap;
use std::time::Duration;

use lsp_types::notification::Notification;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::types::{AnyNotification, AnyResponse, Message, RequestId, ResponseError};
use crate::{Error, Result};

use super::{ServerId, TransportEvent, TransportStatus};

/// Outbound traffic accepted by the pump.
pub(super) enum Outbound {
	/// A request with its response slot. The ID is already assigned.
	Request {
		request: crate::types::AnyRequest,
		response_tx: oneshot::Sender<Result<AnyResponse>>,
	},
	/// A notification.
	Notify { notif: AnyNotification },
	/// Abandon a pending request: drop its response slot and tell the
	/// server via `$/cancelRequest`.
	Cancel { id: RequestId },
}

/// Write side of the wire, implemented per transport.
pub(super) trait MessageSink: Send + 'static {
	/// Encode and write one message.
	fn send(&mut self, msg: &Message) -> impl Future<Output = Result<()>> + Send;
}

/// Send a request through the pump and await its response.
///
/// On cancellation or timeout the pending entry is dropped first, so a
/// late response can never be delivered to the caller.
pub(super) async fn dispatch_request(
	outbound_tx: &mpsc::UnboundedSender<Outbound>,
	request: crate::types::AnyRequest,
	timeout: Duration,
	token: &CancellationToken,
) -> Result<AnyResponse> {
	let id = request.id.clone();
	let method = request.method.clone();
	let (response_tx, response_rx) = oneshot::channel();
	outbound_tx
		.send(Outbound::Request {
			request,
			response_tx,
		})
		.map_err(|_| Error::ServiceStopped)?;

	tokio::select! {
		resp = response_rx => resp.map_err(|_| Error::ServiceStopped)?,
		() = token.cancelled() => {
			let _ = outbound_tx.send(Outbound::Cancel { id });
			Err(Error::Cancelled)
		}
		() = tokio::time::sleep(timeout) => {
			let _ = outbound_tx.send(Outbound::Cancel { id });
			Err(Error::RequestTimeout(method))
		}
	}
}

/// Drive one server's wire until either side goes away.
pub(super) async fn run_pump<S: MessageSink>(
	id: ServerId,
	mut sink: S,
	mut inbound_rx: mpsc::UnboundedReceiver<Result<Message>>,
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
	event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
	let mut pending: HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>> = HashMap::new();

	let status = loop {
		tokio::select! {
			out = outbound_rx.recv() => {
				// Closed queue means the transport dropped the server.
				let Some(out) = out else { break TransportStatus::Stopped };
				match handle_outbound(id, out, &mut sink, &mut pending).await {
					Ok(()) => {}
					Err(status) => break status,
				}
			}
			inbound = inbound_rx.recv() => {
				match inbound {
					None => {
						tracing::info!(server = %id, "analysis server closed the connection");
						break TransportStatus::Stopped;
					}
					Some(Err(e)) => {
						tracing::error!(server = %id, error = %e, "failed to read from analysis server");
						break TransportStatus::Crashed;
					}
					Some(Ok(msg)) => {
						match handle_inbound(id, msg, &mut sink, &mut pending, &event_tx).await {
							Ok(()) => {}
							Err(status) => break status,
						}
					}
				}
			}
		}
	};

	let _ = event_tx.send(TransportEvent::Status(status));

	// Fail anything still waiting on this server.
	for (_, tx) in pending.drain() {
		let _ = tx.send(Err(Error::ServiceStopped));
	}
	while let Ok(out) = outbound_rx.try_recv() {
		if let Outbound::Request { response_tx, .. } = out {
			let _ = response_tx.send(Err(Error::ServiceStopped));
		}
	}
}

async fn handle_outbound<S: MessageSink>(
	id: ServerId,
	out: Outbound,
	sink: &mut S,
	pending: &mut HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>>,
) -> Result<(), TransportStatus> {
	let write_res = match out {
		Outbound::Request {
			request,
			response_tx,
		} => {
			let rid = request.id.clone();
			match sink.send(&Message::Request(request)).await {
				Ok(()) => {
					pending.insert(rid, response_tx);
					Ok(())
				}
				Err(e) => {
					let _ = response_tx.send(Err(Error::ServiceStopped));
					Err(e)
				}
			}
		}
		Outbound::Notify { notif } => sink.send(&Message::Notification(notif)).await,
		Outbound::Cancel { id } => {
			// Only tell the server if the request is actually still open.
			if pending.remove(&id).is_some() {
				let notif = AnyNotification {
					method: lsp_types::notification::Cancel::METHOD.into(),
					params: serde_json::json!({ "id": id }),
				};
				sink.send(&Message::Notification(notif)).await
			} else {
				Ok(())
			}
		}
	};

	write_res.map_err(|e| {
		tracing::error!(server = %id, error = %e, "outbound write failed; terminating pump");
		TransportStatus::Crashed
	})
}

async fn handle_inbound<S: MessageSink>(
	id: ServerId,
	msg: Message,
	sink: &mut S,
	pending: &mut HashMap<RequestId, oneshot::Sender<Result<AnyResponse>>>,
	event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportStatus> {
	match msg {
		Message::Response(resp) => {
			match pending.remove(&resp.id) {
				Some(tx) => {
					let _ = tx.send(Ok(resp));
				}
				// Cancelled or timed out; the result must not surface.
				None => tracing::debug!(server = %id, id = %resp.id, "dropping response to abandoned request"),
			}
			Ok(())
		}
		Message::Notification(notif) => {
			let _ = event_tx.send(TransportEvent::Notification(notif));
			Ok(())
		}
		Message::Request(req) => {
			// The protocol surface defines no server-initiated requests.
			tracing::warn!(server = %id, method = %req.method, "rejecting server-initiated request");
			let reply = Message::Response(AnyResponse {
				id: req.id,
				result: None,
				error: Some(ResponseError::method_not_found(&req.method)),
			});
			sink.send(&reply).await.map_err(|e| {
				tracing::error!(server = %id, error = %e, "reply write failed; terminating pump");
				TransportStatus::Crashed
			})
		}
	}
}
