use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{ResetResponse, SimulatorTransport, StepResponse};
use crate::config::Params;
use crate::error::{GatewayError, Result};
use crate::snapshot::ExternalActionPayload;

/// One call on the wire: `{"method": "...", "params": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum Request {
    Configure(Params),
    Reset { seed: u64 },
    Step { action: ExternalActionPayload },
    Render,
    Close,
}

/// One answer on the wire: `{"result": ...}` or `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Response {
    Result(Value),
    Error(String),
}

fn write_line<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read one line, or `None` at end of stream
fn read_line(reader: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Talks to a simulator over TCP with newline-delimited JSON messages
pub struct TcpTransport {
    conn: Option<Connection>,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!("Connected to simulator at {}", stream.peer_addr()?);
        Ok(Self {
            conn: Some(Connection {
                reader: BufReader::new(stream.try_clone()?),
                writer: BufWriter::new(stream),
            }),
        })
    }

    /// Fail any call the simulator does not answer within `timeout`
    ///
    /// A timed out call drops the connection, since a late answer would otherwise be
    /// read as the reply to the next request.
    pub fn with_read_timeout(self, timeout: Duration) -> Result<Self> {
        if let Some(conn) = &self.conn {
            conn.reader.get_ref().set_read_timeout(Some(timeout))?;
        }
        Ok(self)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn call<T: DeserializeOwned>(&mut self, request: &Request) -> Result<T> {
        let conn = self.conn.as_mut().ok_or(GatewayError::Closed)?;
        write_line(&mut conn.writer, request)?;
        let line = match read_line(&mut conn.reader) {
            Err(GatewayError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                error!("Simulator did not answer in time, dropping the connection");
                self.conn = None;
                return Err(GatewayError::Io(e));
            }
            other => other?,
        }
        .ok_or_else(|| GatewayError::Remote("connection closed by simulator".to_owned()))?;
        match serde_json::from_str::<Response>(&line)? {
            Response::Result(value) => Ok(serde_json::from_value(value)?),
            Response::Error(message) => Err(GatewayError::Remote(message)),
        }
    }
}

impl SimulatorTransport for TcpTransport {
    fn configure(&mut self, params: &Params) -> Result<()> {
        self.call::<Value>(&Request::Configure(params.clone()))
            .map(|_| ())
    }

    fn reset(&mut self, seed: u64) -> Result<ResetResponse> {
        self.call(&Request::Reset { seed })
    }

    fn step(&mut self, action: &ExternalActionPayload) -> Result<StepResponse> {
        self.call(&Request::Step { action: *action })
    }

    fn render(&mut self) -> Result<Value> {
        self.call(&Request::Render)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = write_line(&mut conn.writer, &Request::Close) {
            debug!("Simulator did not take the close request: {}", e);
        }
        if let Err(e) = conn.reader.get_ref().shutdown(Shutdown::Both) {
            debug!("Socket shutdown failed: {}", e);
        }
        info!("Simulator connection closed");
        Ok(())
    }
}

/// Answer requests from one client by forwarding them to `transport`
///
/// Runs until the client sends `close` or disconnects. Transport errors are sent back
/// as error responses; malformed requests are answered and skipped.
pub fn serve<T: SimulatorTransport>(stream: TcpStream, transport: &mut T) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    while let Some(line) = read_line(&mut reader)? {
        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {}", e);
                write_line(&mut writer, &Response::Error(e.to_string()))?;
                continue;
            }
        };

        let result = match &request {
            Request::Configure(params) => transport.configure(params).map(|()| Value::Null),
            Request::Reset { seed } => transport
                .reset(*seed)
                .and_then(|r| Ok(serde_json::to_value(r)?)),
            Request::Step { action } => transport
                .step(action)
                .and_then(|r| Ok(serde_json::to_value(r)?)),
            Request::Render => transport.render(),
            Request::Close => return transport.close(),
        };

        let response = match result {
            Ok(value) => Response::Result(value),
            Err(e) => Response::Error(e.to_string()),
        };
        write_line(&mut writer, &response)?;
    }
    debug!("Client disconnected");
    Ok(())
}
