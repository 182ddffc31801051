//! Node client: registers with the coordinator, answers time requests from
//! its logical clock and applies the adjustments it is sent.

use berkeley_time::SharedClock;
use berkeley_types::{decode_message, Message, Registration};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::applier::AdjustmentApplier;
use crate::error::NetworkError;
use crate::framing::{write_message, LineReader};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the coordinator.
    pub coordinator_addr: String,
    /// Identifier this node registers under.
    pub node_id: String,
}

pub struct NodeClient {
    config: ClientConfig,
    applier: AdjustmentApplier,
}

impl NodeClient {
    pub fn new(config: ClientConfig, applier: AdjustmentApplier) -> Self {
        Self { config, applier }
    }

    pub fn clock(&self) -> SharedClock {
        self.applier.clock()
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Connect, register and serve the protocol until the coordinator closes
    /// the connection.
    pub async fn run(&self) -> Result<(), NetworkError> {
        let addr = &self.config.coordinator_addr;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| NetworkError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        info!("[+] Connected to coordinator {} as {}", addr, self.config.node_id);
        self.serve(stream).await
    }

    /// Run the protocol over an already connected stream.
    pub async fn serve(&self, stream: TcpStream) -> Result<(), NetworkError> {
        let (read_half, mut write_half) = stream.into_split();
        write_message(&mut write_half, &Registration::new(self.config.node_id.clone())).await?;

        let clock = self.applier.clock();
        let mut reader = LineReader::new(read_half);
        while let Some(line) = reader.next_line().await? {
            match decode_message(&line) {
                Ok(Message::TimeRequest { t0 }) => {
                    let t1 = clock.lock().now();
                    write_message(&mut write_half, &Message::TimeReply { t1, t0: Some(t0) })
                        .await?;
                    debug!("[>] reply TIME_REPLY t1={t1:.3}");
                }
                Ok(Message::Adjust { offset }) => {
                    info!("[<] ADJUST offset={offset:.3}");
                    self.applier.apply(offset);
                }
                Ok(other) => debug!("ignoring unexpected {} message", other.type_name()),
                Err(err) => debug!("dropping malformed line: {err}"),
            }
        }

        info!("[-] Disconnected from coordinator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berkeley_time::LogicalClock;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn registers_replies_and_applies_adjustments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let coordinator = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            let registration = lines.next_line().await.unwrap().unwrap();
            assert_eq!(registration, r#"{"id":"C1"}"#);

            write_half
                .write_all(b"{\"type\":\"HELLO\"}\n{\"type\":\"TIME_REQUEST\",\"t0\":42.5}\n")
                .await
                .unwrap();
            let reply = lines.next_line().await.unwrap().unwrap();
            let Ok(Message::TimeReply { t1, t0 }) = decode_message(reply.as_bytes()) else {
                panic!("unexpected reply {reply}");
            };

            write_half
                .write_all(b"{\"type\":\"ADJUST\",\"offset\":-1.5}\n")
                .await
                .unwrap();
            (t1, t0)
        });

        let clock = LogicalClock::with_base(1_000.0, 3.0, 0.0).into_shared();
        let client = NodeClient::new(
            ClientConfig {
                coordinator_addr: addr.to_string(),
                node_id: "C1".to_string(),
            },
            AdjustmentApplier::new(clock.clone()),
        );

        // Returns once the scripted coordinator hangs up.
        client.run().await.unwrap();

        let (t1, echoed) = coordinator.await.unwrap();
        assert_eq!(echoed, Some(42.5));
        assert!((1_003.0..1_004.0).contains(&t1), "t1={t1}");
        assert_eq!(clock.lock().offset(), 1.5);
        assert_eq!(client.node_id(), "C1");
    }

    #[tokio::test]
    async fn unreachable_coordinator_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = NodeClient::new(
            ClientConfig {
                coordinator_addr: addr.to_string(),
                node_id: "C1".to_string(),
            },
            AdjustmentApplier::new(LogicalClock::default().into_shared()),
        );
        assert!(matches!(
            client.run().await,
            Err(NetworkError::Connect { .. })
        ));
    }
}
