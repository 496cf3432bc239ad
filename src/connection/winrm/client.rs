//! WS-Management remote shell client.
//!
//! A [`WinRmClient`] drives one shell through its lifecycle:
//!
//! ```text
//! create_shell -> execute_command -> receive_output* -> delete_shell
//!                                  \-> signal ------/
//! ```
//!
//! Each step is a single POST. The shell and command identifiers returned by
//! the server are kept in the client and attached to every later request.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::soap::{self, Element, EnvelopeSettings, SoapAction, COMMAND_STATE_DONE_SUFFIX};
use super::transport::WinRmTransport;
use super::WinRmConfig;
use crate::error::{Error, Result};

/// Protocol state of one shell.
#[derive(Debug, Default)]
struct WinRmSession {
    shell_id: Option<String>,
    command_id: Option<String>,
    exit_value: Option<i32>,
    chunk: u64,
}

/// Client for a single remote shell.
#[derive(Debug)]
pub struct WinRmClient {
    transport: Arc<WinRmTransport>,
    settings: EnvelopeSettings,
    codepage: u32,
    session: Mutex<WinRmSession>,
}

impl WinRmClient {
    /// Create a client that posts through `transport`.
    pub fn new(config: &WinRmConfig, transport: Arc<WinRmTransport>) -> Self {
        Self {
            settings: EnvelopeSettings {
                to: transport.endpoint().to_string(),
                max_envelope_size: config.envelope_size,
                locale: config.locale.clone(),
                operation_timeout: config.timeout.clone(),
            },
            codepage: config.codepage,
            transport,
            session: Mutex::new(WinRmSession::default()),
        }
    }

    /// Shell ID, once created.
    pub fn shell_id(&self) -> Option<String> {
        self.session.lock().shell_id.clone()
    }

    /// Command ID, once a command was started.
    pub fn command_id(&self) -> Option<String> {
        self.session.lock().command_id.clone()
    }

    /// Exit code, once reported by the server.
    pub fn exit_value(&self) -> Option<i32> {
        self.session.lock().exit_value
    }

    /// Number of `receive_output` calls that did not finish the command.
    pub fn chunk(&self) -> u64 {
        self.session.lock().chunk
    }

    /// Post one request and return the response body element.
    ///
    /// `inspect` runs on the body; its error is turned into a protocol fault
    /// that carries both documents.
    async fn exchange<T>(
        &self,
        action: SoapAction,
        options: &[(&str, String)],
        body: &str,
        inspect: impl FnOnce(&Element<'_>) -> std::result::Result<T, String>,
    ) -> Result<T> {
        let shell_id = self.shell_id();
        let request = soap::envelope(&self.settings, action, shell_id.as_deref(), options, body);
        let response = self.transport.post(action, &request).await?;

        let outcome = soap::response_body(&response).and_then(|body| inspect(&body));
        outcome.map_err(|message| {
            Error::protocol(format!("{} failed: {}", action, message))
                .with_request(request)
                .with_response(response)
        })
    }

    /// Create a shell and remember its ID.
    pub async fn create_shell(&self) -> Result<String> {
        let options = [
            ("WINRS_NOPROFILE", "FALSE".to_string()),
            ("WINRS_CODEPAGE", self.codepage.to_string()),
        ];
        let shell_id = self
            .exchange(SoapAction::Shell, &options, &soap::shell_body(), |body| {
                body.find_all("Selector")
                    .into_iter()
                    .find(|s| s.attribute("Name") == Some("ShellId"))
                    .or_else(|| body.find("ShellId"))
                    .map(|e| e.text())
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| "no ShellId in response".to_string())
            })
            .await?;

        debug!(shell_id = %shell_id, "Created WinRM shell");
        self.session.lock().shell_id = Some(shell_id.clone());
        Ok(shell_id)
    }

    /// Start `command` in the shell and remember its ID.
    pub async fn execute_command(&self, command: &str) -> Result<String> {
        let options = [
            ("WINRS_CONSOLEMODE_STDIN", "TRUE".to_string()),
            ("WINRS_SKIP_CMD_SHELL", "FALSE".to_string()),
        ];
        let command_id = self
            .exchange(
                SoapAction::CommandLine,
                &options,
                &soap::command_body(command),
                |body| {
                    body.find("CommandId")
                        .map(|e| e.text())
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| "no CommandId in response".to_string())
                },
            )
            .await?;

        debug!(command_id = %command_id, "Started WinRM command");
        self.session.lock().command_id = Some(command_id.clone());
        Ok(command_id)
    }

    /// Poll once for output, appending decoded streams to the sinks.
    ///
    /// Returns `true` while the command is still running; callers loop until
    /// `false`. One call only returns what the server has buffered so far.
    pub async fn receive_output(&self, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> Result<bool> {
        let command_id = self.require_command_id()?;
        let response = self
            .exchange(
                SoapAction::Receive,
                &[],
                &soap::receive_body(&command_id),
                read_receive_response,
            )
            .await?;

        for (name, data) in response.streams {
            match name.as_str() {
                "stdout" => stdout.extend_from_slice(&data),
                "stderr" => stderr.extend_from_slice(&data),
                other => trace!(stream = %other, "Ignoring output of unknown stream"),
            }
        }

        let mut session = self.session.lock();
        // Some servers report the exit code with the first chunk only.
        if session.chunk == 0 {
            if let Some(code) = response.exit_code {
                session.exit_value = Some(code);
            }
        }
        if response.done {
            if let Some(code) = response.exit_code {
                session.exit_value = Some(code);
            }
            debug!(
                command_id = %command_id,
                exit_code = ?session.exit_value,
                "WinRM command finished"
            );
            Ok(false)
        } else {
            session.chunk += 1;
            Ok(true)
        }
    }

    /// Send `data` to the command's stdin.
    pub async fn send_input(&self, data: &[u8]) -> Result<()> {
        let command_id = self.require_command_id()?;
        trace!(command_id = %command_id, bytes = data.len(), "Sending input");
        self.exchange(
            SoapAction::Send,
            &[],
            &soap::send_body(&command_id, data),
            |_| Ok(()),
        )
        .await
    }

    /// Ask the server to terminate the running command.
    ///
    /// Does nothing, apart from a warning, when no command was started.
    pub async fn signal(&self) -> Result<()> {
        let Some(command_id) = self.command_id() else {
            warn!("No command is running, not sending terminate signal");
            return Ok(());
        };
        self.exchange(
            SoapAction::Signal,
            &[],
            &soap::signal_body(&command_id),
            |_| Ok(()),
        )
        .await?;
        debug!(command_id = %command_id, "Sent terminate signal");
        Ok(())
    }

    /// Delete the shell on the server.
    ///
    /// Does nothing, apart from a warning, when no shell exists.
    pub async fn delete_shell(&self) -> Result<()> {
        let Some(shell_id) = self.shell_id() else {
            warn!("No shell has been created, not deleting it");
            return Ok(());
        };
        self.exchange(SoapAction::Delete, &[], "", |_| Ok(())).await?;

        let mut session = self.session.lock();
        session.shell_id = None;
        session.command_id = None;
        debug!(shell_id = %shell_id, "Deleted WinRM shell");
        Ok(())
    }

    fn require_command_id(&self) -> Result<String> {
        self.command_id()
            .ok_or_else(|| Error::IllegalState("No command has been started".to_string()))
    }
}

/// What one `Receive` response carried.
#[derive(Debug, Default)]
struct ReceiveResponse {
    streams: Vec<(String, Vec<u8>)>,
    done: bool,
    exit_code: Option<i32>,
}

fn read_receive_response(body: &Element<'_>) -> std::result::Result<ReceiveResponse, String> {
    let mut response = ReceiveResponse::default();

    for stream in body.find_all("Stream") {
        let name = stream.attribute("Name").unwrap_or_default().to_string();
        let text: String = stream.text().split_whitespace().collect();
        if text.is_empty() {
            continue;
        }
        let data = BASE64_STANDARD
            .decode(text.as_bytes())
            .map_err(|e| format!("invalid base64 in {} stream: {}", name, e))?;
        response.streams.push((name, data));
    }

    if let Some(state) = body.find("CommandState") {
        response.done = state
            .attribute("State")
            .is_some_and(|s| s.ends_with(COMMAND_STATE_DONE_SUFFIX));
        if let Some(code) = state.find("ExitCode") {
            let text = code.text();
            let parsed = text
                .parse::<i32>()
                .map_err(|_| format!("invalid ExitCode '{}'", text))?;
            response.exit_code = Some(parsed);
        }
    }

    Ok(response)
}
