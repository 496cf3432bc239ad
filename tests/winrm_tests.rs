//! Tests for the WinRM transport against a mock WS-Management endpoint
//!
//! Each test starts a wiremock server that answers the shell protocol
//! operations by their `SOAPAction` header. These tests cover:
//! - Shell creation, command start, output polling and shell deletion
//! - Protocol faults carrying request and response documents
//! - Destroying a process while another task waits for it
//! - Negotiate authentication with a fallback to Basic

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use hostsession::cmdline::CmdLine;
use hostsession::connection::winrm::soap::SoapAction;
use hostsession::connection::winrm::{
    KerberosCredentials, SpnegoTokenProvider, WinRmClient, WinRmConfig, WinRmConnection,
    WinRmTransport,
};
use hostsession::connection::Connection;
use hostsession::error::{Error, Result};
use hostsession::options::{keys, ConnectionOptions};
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const RUNNING: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running";
const DONE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hostsession=trace")
        .with_test_writer()
        .try_init();
}

fn soap(body: &str) -> ResponseTemplate {
    let document = format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell" "#,
            r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">"#,
            "<s:Header/><s:Body>{}</s:Body></s:Envelope>"
        ),
        body
    );
    ResponseTemplate::new(200).set_body_raw(document, SOAP_CONTENT_TYPE)
}

fn shell_created(shell_id: &str) -> ResponseTemplate {
    soap(&format!(
        r#"<x:ResourceCreated xmlns:x="http://schemas.xmlsoap.org/ws/2004/09/transfer">
            <w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>
        </x:ResourceCreated>"#,
        shell_id
    ))
}

fn command_started(command_id: &str) -> ResponseTemplate {
    soap(&format!(
        "<rsp:CommandResponse><rsp:CommandId>{}</rsp:CommandId></rsp:CommandResponse>",
        command_id
    ))
}

fn receive(stdout: &str, state: &str, exit_code: Option<i32>) -> ResponseTemplate {
    let stream = if stdout.is_empty() {
        String::new()
    } else {
        format!(
            r#"<rsp:Stream Name="stdout" CommandId="CMD-1">{}</rsp:Stream>"#,
            BASE64_STANDARD.encode(stdout)
        )
    };
    let state = match exit_code {
        Some(code) => format!(
            r#"<rsp:CommandState CommandId="CMD-1" State="{}"><rsp:ExitCode>{}</rsp:ExitCode></rsp:CommandState>"#,
            state, code
        ),
        None => format!(r#"<rsp:CommandState CommandId="CMD-1" State="{}"/>"#, state),
    };
    soap(&format!(
        "<rsp:ReceiveResponse>{}{}</rsp:ReceiveResponse>",
        stream, state
    ))
}

fn on(action: SoapAction) -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/wsman"))
        .and(header("SOAPAction", action.uri()))
}

fn config(server: &MockServer) -> WinRmConfig {
    let mut config = WinRmConfig::new(server.address().ip().to_string());
    config.port = server.address().port();
    config.username = "Administrator".to_string();
    config.password = Some("secret".to_string());
    config
}

fn client(server: &MockServer) -> WinRmClient {
    let config = config(server);
    let transport = Arc::new(WinRmTransport::new(&config, None).unwrap());
    WinRmClient::new(&config, transport)
}

fn options(server: &MockServer) -> ConnectionOptions {
    ConnectionOptions::new()
        .with(keys::OPERATING_SYSTEM, "WINDOWS")
        .with(keys::ADDRESS, server.address().ip())
        .with(keys::PORT, server.address().port())
        .with(keys::USERNAME, "Administrator")
        .with(keys::PASSWORD, "secret")
}

async fn mount_shell(server: &MockServer) {
    on(SoapAction::Shell)
        .respond_with(shell_created("SHELL-1"))
        .mount(server)
        .await;
    on(SoapAction::CommandLine)
        .respond_with(command_started("CMD-1"))
        .mount(server)
        .await;
}

// ============================================================================
// Client
// ============================================================================

#[tokio::test]
async fn test_create_shell_reads_selector() {
    init_tracing();
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .and(body_string_contains("WINRS_CODEPAGE"))
        .respond_with(shell_created("11111111-2222-3333-4444-555555555555"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let shell_id = client.create_shell().await.unwrap();

    assert_eq!(shell_id, "11111111-2222-3333-4444-555555555555");
    assert_eq!(client.shell_id().as_deref(), Some(shell_id.as_str()));
    assert_eq!(client.command_id(), None);
}

#[tokio::test]
async fn test_create_shell_reads_shell_element() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(soap("<rsp:Shell><rsp:ShellId>SHELL-9</rsp:ShellId></rsp:Shell>"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(client.create_shell().await.unwrap(), "SHELL-9");
}

#[tokio::test]
async fn test_requests_carry_shell_selector_and_basic_auth() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(shell_created("SHELL-1"))
        .mount(&server)
        .await;
    on(SoapAction::CommandLine)
        .and(body_string_contains(r#"<w:Selector Name="ShellId">SHELL-1</w:Selector>"#))
        .and(body_string_contains("&quot;dir C:\\&quot;"))
        .respond_with(command_started("CMD-1"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.create_shell().await.unwrap();
    assert_eq!(client.execute_command("dir C:\\").await.unwrap(), "CMD-1");

    let requests = server.received_requests().await.unwrap();
    let expected_auth = format!("Basic {}", BASE64_STANDARD.encode("Administrator:secret"));
    for request in &requests {
        assert_eq!(
            request.headers.get("content-type").unwrap().to_str().unwrap(),
            SOAP_CONTENT_TYPE
        );
        assert_eq!(
            request.headers.get("authorization").unwrap().to_str().unwrap(),
            expected_auth
        );
    }
}

#[tokio::test]
async fn test_receive_output_until_done() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("Volume in drive C\r\n", RUNNING, None))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("Directory of C:\\\r\n", DONE, Some(0)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.create_shell().await.unwrap();
    client.execute_command("dir").await.unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    assert!(client.receive_output(&mut stdout, &mut stderr).await.unwrap());
    assert_eq!(client.exit_value(), None);
    assert!(!client.receive_output(&mut stdout, &mut stderr).await.unwrap());

    assert_eq!(
        String::from_utf8(stdout).unwrap(),
        "Volume in drive C\r\nDirectory of C:\\\r\n"
    );
    assert!(stderr.is_empty());
    assert_eq!(client.exit_value(), Some(0));
    assert_eq!(client.chunk(), 1);
}

#[tokio::test]
async fn test_receive_without_command_is_illegal() {
    let server = MockServer::start().await;
    let client = client(&server);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = client
        .receive_output(&mut stdout, &mut stderr)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
    assert!(matches!(
        client.send_input(b"data").await,
        Err(Error::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_signal_and_delete_without_ids_send_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(soap(""))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    client.signal().await.unwrap();
    client.delete_shell().await.unwrap();
}

#[tokio::test]
async fn test_delete_shell_forgets_ids() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Delete)
        .and(body_string_contains("SHELL-1"))
        .respond_with(soap(""))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.create_shell().await.unwrap();
    client.execute_command("ver").await.unwrap();
    client.delete_shell().await.unwrap();

    assert_eq!(client.shell_id(), None);
    assert_eq!(client.command_id(), None);
    client.delete_shell().await.unwrap();
}

// ============================================================================
// Protocol faults
// ============================================================================

#[tokio::test]
async fn test_http_error_is_protocol_fault() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(ResponseTemplate::new(500).set_body_string("internal failure"))
        .mount(&server)
        .await;

    let err = client(&server).create_shell().await.unwrap_err();

    assert!(err.is_protocol());
    assert!(err.to_string().contains("500"));
    assert!(err.request_document().unwrap().contains("WINRS_NOPROFILE"));
    assert_eq!(err.response_document(), Some("internal failure"));
}

#[tokio::test]
async fn test_unauthorized_without_body_has_no_response_document() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server).create_shell().await.unwrap_err();

    assert!(err.is_protocol());
    assert!(err.request_document().is_some());
    assert_eq!(err.response_document(), None);
}

#[tokio::test]
async fn test_non_soap_content_type_is_protocol_fault() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let err = client(&server).create_shell().await.unwrap_err();

    assert!(err.is_protocol());
    assert!(err.to_string().contains("text/html"));
    assert!(err.request_document().is_some());
    assert_eq!(err.response_document(), Some("<html/>"));
}

#[tokio::test]
async fn test_soap_fault_is_protocol_fault() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(soap(
            r#"<s:Fault>
                <s:Code>
                    <s:Value>s:Receiver</s:Value>
                    <s:Subcode><s:Value>w:InternalError</s:Value></s:Subcode>
                </s:Code>
                <s:Reason><s:Text xml:lang="en-US">The WS-Management service cannot process the request.</s:Text></s:Reason>
            </s:Fault>"#,
        ))
        .mount(&server)
        .await;

    let err = client(&server).create_shell().await.unwrap_err();

    assert!(err.is_protocol());
    let message = err.to_string();
    assert!(message.contains("w:InternalError"));
    assert!(message.contains("cannot process the request"));
    assert!(err.response_document().unwrap().contains("Fault"));
}

#[tokio::test]
async fn test_missing_shell_id_is_protocol_fault() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(soap("<rsp:Shell/>"))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.create_shell().await.unwrap_err();

    assert!(err.is_protocol());
    assert!(err.to_string().contains("ShellId"));
    assert_eq!(client.shell_id(), None);
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_execute_round_trip() {
    init_tracing();
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("Microsoft Windows [Version 10.0.17763]\r\n", DONE, Some(0)))
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Delete)
        .respond_with(soap(""))
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Send).respond_with(soap("")).expect(0).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let result = conn.execute_capturing(&CmdLine::build(["ver"])).await.unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "Microsoft Windows [Version 10.0.17763]");
    assert_eq!(result.stderr, "");
}

#[tokio::test]
async fn test_execute_reports_remote_exit_code() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, Some(5)))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let result = conn
        .execute_capturing(&CmdLine::build(["exit", "/b", "5"]))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 5);
    assert!(!result.success);
}

#[tokio::test]
async fn test_done_without_exit_code_is_protocol_fault() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, None))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let process = conn.start_process(&CmdLine::build(["ver"])).await.unwrap();

    let err = process.wait_for().await.unwrap_err();
    assert!(err.is_protocol());
    assert_eq!(process.exit_value().unwrap(), -1);
}

#[tokio::test]
async fn test_failed_command_start_deletes_shell() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .respond_with(shell_created("SHELL-1"))
        .mount(&server)
        .await;
    on(SoapAction::CommandLine)
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    on(SoapAction::Delete)
        .respond_with(soap(""))
        .expect(1)
        .mount(&server)
        .await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let result = conn.start_process(&CmdLine::build(["ver"])).await;

    assert!(matches!(result, Err(ref e) if e.is_protocol()));
}

#[tokio::test]
async fn test_stdin_is_sent_to_command() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Send)
        .and(body_string_contains(&BASE64_STANDARD.encode("y\r\n")))
        .respond_with(soap(""))
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, None).set_delay(Duration::from_millis(50)))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, Some(0)))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let process = conn.start_process(&CmdLine::build(["del", "/p", "a.txt"])).await.unwrap();

    let mut stdin = process.take_stdin().unwrap();
    stdin.write_all(b"y\r\n").await.unwrap();
    stdin.flush().await.unwrap();
    drop(stdin);

    assert_eq!(process.wait_for().await.unwrap(), 0);
}

#[tokio::test]
async fn test_destroy_unblocks_waiter() {
    init_tracing();
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, None).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;
    on(SoapAction::Signal)
        .and(body_string_contains("CMD-1"))
        .respond_with(soap("<rsp:SignalResponse/>"))
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Delete)
        .respond_with(soap(""))
        .expect(1)
        .mount(&server)
        .await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let process: Arc<dyn hostsession::process::Process> = Arc::from(
        conn.start_process(&CmdLine::build(["ping", "-t", "localhost"]))
            .await
            .unwrap(),
    );

    let waiter = {
        let process = process.clone();
        tokio::spawn(async move { process.wait_for().await })
    };
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!waiter.is_finished());

    process.destroy().await;
    let code = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(code, -1);
    assert_eq!(process.exit_value().unwrap(), -1);
    process.destroy().await;
}

async fn requests_for(server: &MockServer, action: SoapAction) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            r.headers
                .get("SOAPAction")
                .and_then(|v| v.to_str().ok())
                == Some(action.uri())
        })
        .count()
}

#[tokio::test]
async fn test_dropped_execute_signals_and_deletes_shell() {
    init_tracing();
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, None).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;
    on(SoapAction::Signal)
        .respond_with(soap("<rsp:SignalResponse/>"))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let cmd = CmdLine::build(["ping", "-t", "localhost"]);
    let outcome = tokio::time::timeout(Duration::from_millis(300), conn.execute_capturing(&cmd)).await;
    assert!(outcome.is_err());

    let mut deleted = 0;
    for _ in 0..50 {
        deleted = requests_for(&server, SoapAction::Delete).await;
        if deleted > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(deleted, 1);
    assert_eq!(requests_for(&server, SoapAction::Signal).await, 1);
}

#[tokio::test]
async fn test_exit_code_from_first_chunk_is_kept() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, Some(7)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, None))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let client = client(&server);
    client.create_shell().await.unwrap();
    client.execute_command("cmd /c exit 7").await.unwrap();

    let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
    assert!(client.receive_output(&mut stdout, &mut stderr).await.unwrap());
    assert_eq!(client.exit_value(), Some(7));
    assert!(!client.receive_output(&mut stdout, &mut stderr).await.unwrap());
    assert_eq!(client.exit_value(), Some(7));
}

#[tokio::test]
async fn test_wait_for_uses_exit_code_from_first_chunk() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, Some(7)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, None))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let process = conn.start_process(&CmdLine::build(["exit", "/b", "7"])).await.unwrap();

    assert_eq!(process.wait_for().await.unwrap(), 7);
    assert_eq!(process.exit_value().unwrap(), 7);
}

#[tokio::test]
async fn test_done_exit_code_overrides_first_chunk() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("", RUNNING, Some(7)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    on(SoapAction::Receive)
        .respond_with(receive("", DONE, Some(0)))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let result = conn.execute_capturing(&CmdLine::build(["ver"])).await.unwrap();

    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn test_exists_parses_builtin_output() {
    let server = MockServer::start().await;
    mount_shell(&server).await;
    on(SoapAction::Receive)
        .respond_with(receive("present\r\n", DONE, Some(0)))
        .mount(&server)
        .await;
    on(SoapAction::Delete).respond_with(soap("")).mount(&server).await;

    let conn = WinRmConnection::new(&options(&server)).unwrap();
    let path = conn.file("C:\\windows\\temp\\report.csv");
    assert!(conn.exists(&path).await.unwrap());

    let requests = server.received_requests().await.unwrap();
    let command = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .find(|body| body.contains("<rsp:Command>"))
        .unwrap();
    assert!(command.contains("if exist &quot;C:\\windows\\temp\\report.csv&quot; (echo present)"));
}

// ============================================================================
// Kerberos
// ============================================================================

/// Returns a fixed token and records what it was asked for.
#[derive(Default)]
struct FixedTokenProvider {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SpnegoTokenProvider for FixedTokenProvider {
    async fn initial_token(
        &self,
        credentials: &KerberosCredentials,
        service_principal: &str,
    ) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .push((credentials.principal.clone(), service_principal.to_string()));
        Ok(b"token".to_vec())
    }
}

fn kerberos_options(server: &MockServer) -> ConnectionOptions {
    options(server).with(keys::USERNAME, "admin@corp.example.com")
}

#[tokio::test]
async fn test_negotiate_header_from_provider() {
    let server = MockServer::start().await;
    on(SoapAction::Shell)
        .and(header("Authorization", "Negotiate dG9rZW4="))
        .respond_with(shell_created("SHELL-K"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(FixedTokenProvider::default());
    let mut config = config(&server);
    config.username = "admin@corp.example.com".to_string();
    let transport = Arc::new(WinRmTransport::new(&config, Some(provider.clone())).unwrap());
    let client = WinRmClient::new(&config, transport);

    assert_eq!(client.create_shell().await.unwrap(), "SHELL-K");
    let ip = server.address().ip().to_string();
    assert_eq!(
        *provider.calls.lock(),
        vec![("admin@CORP.EXAMPLE.COM".to_string(), format!("WSMAN/{}", ip))]
    );
}

#[tokio::test]
async fn test_negotiate_rejected_falls_back_to_basic() {
    let server = MockServer::start().await;
    let basic = format!(
        "Basic {}",
        BASE64_STANDARD.encode("admin@corp.example.com:secret")
    );
    on(SoapAction::Shell)
        .and(header("Authorization", "Negotiate dG9rZW4="))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    on(SoapAction::Shell)
        .and(header("Authorization", basic.as_str()))
        .respond_with(shell_created("SHELL-B"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(FixedTokenProvider::default());
    let conn = WinRmConnection::with_spnego_provider(
        &kerberos_options(&server),
        Some(provider.clone() as Arc<dyn SpnegoTokenProvider>),
    )
    .unwrap();
    assert_eq!(conn.config().username, "admin@corp.example.com");

    let transport = Arc::new(WinRmTransport::new(conn.config(), Some(provider.clone())).unwrap());
    let client = WinRmClient::new(conn.config(), transport);

    assert_eq!(client.create_shell().await.unwrap(), "SHELL-B");
    assert_eq!(provider.calls.lock().len(), 1);
}
