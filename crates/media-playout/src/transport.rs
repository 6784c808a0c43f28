use conductor::{DeviceError, DeviceId, EventBus};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_consecutive_failures: usize,
	pub initial_delay: Duration,
	pub max_delay: Duration,
	pub backoff_multiplier: f64,
	pub circuit_breaker_timeout: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_consecutive_failures: 10,
			initial_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			backoff_multiplier: 1.5,
			circuit_breaker_timeout: Duration::from_secs(15),
		}
	}
}

struct RetryPolicy {
	config: RetryConfig,
	consecutive_failures: usize,
	current_delay: Duration,
}

impl RetryPolicy {
	fn new(config: RetryConfig) -> Self {
		let current_delay = config.initial_delay;
		Self {
			config,
			consecutive_failures: 0,
			current_delay,
		}
	}

	/// Sleep out the backoff for one more failed attempt. After too many
	/// consecutive failures the circuit breaker holds the longer timeout.
	async fn backoff(&mut self) {
		self.consecutive_failures += 1;
		let delay = if self.consecutive_failures >= self.config.max_consecutive_failures {
			self.config.circuit_breaker_timeout
		} else {
			self.current_delay
		};
		tokio::time::sleep(delay).await;
		self.current_delay = Duration::from_millis((self.current_delay.as_millis() as f64 * self.config.backoff_multiplier) as u64).min(self.config.max_delay);
	}

	fn reset(&mut self) {
		self.consecutive_failures = 0;
		self.current_delay = self.config.initial_delay;
	}
}

/// Line-based TCP client towards the playout server. Owns a connection task
/// that reconnects with backoff; writes flow through a channel so callers
/// never block on the socket. Responses are surfaced as debug events.
///
/// On every reconnect after the first the device's known state is suspect,
/// so the task probes the server and emits `resetResolver`.
#[derive(Clone)]
pub struct MediaTransport {
	device_id: DeviceId,
	line_tx: mpsc::UnboundedSender<String>,
	connected_rx: watch::Receiver<bool>,
	cancel: CancellationToken,
}

const PROBE_COMMAND: &str = "INFO";

impl MediaTransport {
	pub fn connect(device_id: DeviceId, host: String, port: u16, bus: EventBus) -> Self {
		let (line_tx, line_rx) = mpsc::unbounded_channel();
		let (connected_tx, connected_rx) = watch::channel(false);
		let cancel = CancellationToken::new();

		tokio::spawn(connection_loop(device_id.clone(), host, port, line_rx, connected_tx, bus, cancel.clone()));

		Self {
			device_id,
			line_tx,
			connected_rx,
			cancel,
		}
	}

	pub fn connected(&self) -> bool {
		*self.connected_rx.borrow()
	}

	/// Wait for the first ready (or any later reconnect)
	pub async fn wait_connected(&self, timeout: Duration) -> Result<(), DeviceError> {
		let mut connected_rx = self.connected_rx.clone();
		let wait = async {
			loop {
				if *connected_rx.borrow() {
					return;
				}
				if connected_rx.changed().await.is_err() {
					return;
				}
			}
		};
		tokio::time::timeout(timeout, wait).await.map_err(|_| DeviceError::Timeout(timeout.as_millis() as u64))?;
		if self.connected() {
			Ok(())
		} else {
			Err(DeviceError::Transport("connection task ended".to_string()))
		}
	}

	pub fn send_line(&self, line: String) -> Result<(), DeviceError> {
		if !self.connected() {
			return Err(DeviceError::Transport(format!("{}: not connected", self.device_id)));
		}
		self.line_tx.send(line).map_err(|_| DeviceError::Transport("transport closed".to_string()))
	}

	/// Ask the server for its state; the reply only shows up as debug events
	pub fn send_probe(&self) {
		let _ = self.line_tx.send(PROBE_COMMAND.to_string());
	}

	pub fn dispose(&self) {
		self.cancel.cancel();
	}
}

async fn connection_loop(
	device_id: DeviceId,
	host: String,
	port: u16,
	mut line_rx: mpsc::UnboundedReceiver<String>,
	connected_tx: watch::Sender<bool>,
	bus: EventBus,
	cancel: CancellationToken,
) {
	let address = format!("{}:{}", host, port);
	let mut retry = RetryPolicy::new(RetryConfig::default());
	let mut first_connect = true;

	loop {
		if cancel.is_cancelled() {
			break;
		}

		let stream = tokio::select! {
			_ = cancel.cancelled() => break,
			result = TcpStream::connect(&address) => result,
		};

		match stream {
			Ok(stream) => {
				retry.reset();
				connected_tx.send_replace(true);
				bus.connection_changed(device_id.clone(), true);

				if first_connect {
					first_connect = false;
				} else {
					// whatever we thought the device was doing is stale now
					bus.reset_resolver(device_id.clone());
				}

				run_connection(stream, &mut line_rx, &bus, &device_id, &cancel).await;

				connected_tx.send_replace(false);
				bus.connection_changed(device_id.clone(), false);
				if cancel.is_cancelled() {
					break;
				}
			}
			Err(e) => {
				bus.warning(Some(device_id.clone()), format!("connect to {} failed: {}", address, e));
			}
		}

		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = retry.backoff() => {}
		}
	}

	debug!(%device_id, "transport loop stopped");
}

/// Pump the write channel and read replies until the connection drops
async fn run_connection(stream: TcpStream, line_rx: &mut mpsc::UnboundedReceiver<String>, bus: &EventBus, device_id: &DeviceId, cancel: &CancellationToken) {
	let (read_half, mut write_half) = stream.into_split();
	let mut lines = BufReader::new(read_half).lines();

	// re-query state on every (re)connect
	if write_half.write_all(format!("{}\r\n", PROBE_COMMAND).as_bytes()).await.is_err() {
		return;
	}

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			outgoing = line_rx.recv() => {
				match outgoing {
					Some(line) => {
						if write_half.write_all(format!("{}\r\n", line).as_bytes()).await.is_err() {
							bus.warning(Some(device_id.clone()), "write failed, dropping connection".to_string());
							break;
						}
					}
					None => break,
				}
			}
			incoming = lines.next_line() => {
				match incoming {
					Ok(Some(response)) => bus.debug(Some(device_id.clone()), format!("response: {}", response)),
					Ok(None) => {
						bus.info(Some(device_id.clone()), "server closed the connection".to_string());
						break;
					}
					Err(e) => {
						bus.warning(Some(device_id.clone()), format!("read failed: {}", e));
						break;
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use conductor::EngineEvent;
	use tokio::io::AsyncReadExt;
	use tokio::net::TcpListener;

	async fn read_line(stream: &mut TcpStream) -> String {
		let mut buffer = Vec::new();
		loop {
			let mut byte = [0u8; 1];
			stream.read_exact(&mut byte).await.unwrap();
			if byte[0] == b'\n' {
				break;
			}
			if byte[0] != b'\r' {
				buffer.push(byte[0]);
			}
		}
		String::from_utf8(buffer).unwrap()
	}

	#[tokio::test]
	async fn test_connects_and_sends_lines() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap();
		let bus = EventBus::new(64);

		let transport = MediaTransport::connect("media0".to_string(), address.ip().to_string(), address.port(), bus);
		let (mut server_side, _) = listener.accept().await.unwrap();

		transport.wait_connected(Duration::from_secs(1)).await.unwrap();
		assert!(transport.connected());

		// the automatic state probe arrives first
		assert_eq!(read_line(&mut server_side).await, "INFO");

		transport.send_line("PLAY 1-10 \"AMB\"".to_string()).unwrap();
		assert_eq!(read_line(&mut server_side).await, "PLAY 1-10 \"AMB\"");

		transport.dispose();
	}

	#[tokio::test]
	async fn test_reconnect_emits_connection_changed_and_reset_resolver() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap();
		let bus = EventBus::new(64);
		let mut events = bus.subscribe();

		let transport = MediaTransport::connect("media0".to_string(), address.ip().to_string(), address.port(), bus);

		let (server_side, _) = listener.accept().await.unwrap();
		transport.wait_connected(Duration::from_secs(1)).await.unwrap();
		drop(server_side); // kill the connection

		// the transport reconnects after backoff
		let (_server_side, _) = listener.accept().await.unwrap();

		let mut saw_disconnect = false;
		let mut saw_reset = false;
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		while !(saw_disconnect && saw_reset) {
			let event = tokio::time::timeout_at(deadline, events.recv()).await.expect("timed out waiting for events").unwrap();
			match event {
				EngineEvent::ConnectionChanged { connected: false, .. } => saw_disconnect = true,
				EngineEvent::ResetResolver { .. } => saw_reset = true,
				_ => {}
			}
		}

		transport.dispose();
	}

	#[tokio::test]
	async fn test_send_while_disconnected_fails() {
		// nothing is listening on this port
		let bus = EventBus::new(16);
		let transport = MediaTransport::connect("media0".to_string(), "127.0.0.1".to_string(), 1, bus);
		assert!(transport.send_line("PLAY".to_string()).is_err());
		transport.dispose();
	}
}
