//! Command Line and Envelope Benchmarks
//!
//! This benchmark suite measures the hot paths of every command run:
//! - Encoding command lines for Unix and Windows targets
//! - Rendering SOAP envelopes for the remote shell
//! - Scanning receive responses for streams and command state
//!
//! ```bash
//! cargo bench --bench cmdline_benchmark
//! cargo bench --bench cmdline_benchmark -- envelope
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hostsession::cmdline::CmdLine;
use hostsession::connection::winrm::soap::{self, EnvelopeSettings, SoapAction};
use hostsession::os::OperatingSystemFamily;

// ============================================================================
// Test Data Generators
// ============================================================================

fn generate_plain_command(args: usize) -> CmdLine {
    let mut cmd = CmdLine::build(["robocopy"]);
    for i in 0..args {
        cmd.add_argument(format!("source_{}", i));
    }
    cmd
}

fn generate_special_command(args: usize) -> CmdLine {
    let mut cmd = CmdLine::build(["cmd"]);
    for i in 0..args {
        cmd.add_argument(format!("C:\\Program Files\\App {}\\it's \"quoted\"; $HOME", i));
    }
    cmd.add_password("s3cr3t p@ss");
    cmd
}

fn generate_nested_command(depth: usize) -> CmdLine {
    let mut cmd = CmdLine::build(["echo", "hello world"]);
    for _ in 0..depth {
        let mut outer = CmdLine::build(["sudo", "-u", "deploy"]);
        outer.add_nested(cmd);
        cmd = outer;
    }
    cmd
}

fn settings() -> EnvelopeSettings {
    EnvelopeSettings {
        to: "http://winbox.example.com:5985/wsman".to_string(),
        max_envelope_size: 153_600,
        locale: "en-US".to_string(),
        operation_timeout: "PT60.000S".to_string(),
    }
}

fn generate_receive_response(streams: usize) -> String {
    let chunk = BASE64_STANDARD.encode("Directory of C:\\Windows\\Temp\r\n".repeat(8));
    let mut body = String::from("<rsp:ReceiveResponse>");
    for _ in 0..streams {
        body.push_str(&format!(
            r#"<rsp:Stream Name="stdout" CommandId="CMD-1">{}</rsp:Stream>"#,
            chunk
        ));
    }
    body.push_str(
        r#"<rsp:CommandState CommandId="CMD-1" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"><rsp:ExitCode>0</rsp:ExitCode></rsp:CommandState>"#,
    );
    body.push_str("</rsp:ReceiveResponse>");
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell"><s:Header/><s:Body>{}</s:Body></s:Envelope>"#,
        body
    )
}

// ============================================================================
// Command Line Encoding
// ============================================================================

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("cmdline_encoding");

    for args in [4usize, 32, 256] {
        let plain = generate_plain_command(args);
        let special = generate_special_command(args);
        group.throughput(Throughput::Elements(args as u64));

        group.bench_with_input(BenchmarkId::new("plain_unix", args), &plain, |b, cmd| {
            b.iter(|| cmd.to_command_line(black_box(OperatingSystemFamily::Unix), false))
        });
        group.bench_with_input(BenchmarkId::new("special_unix", args), &special, |b, cmd| {
            b.iter(|| cmd.to_command_line(black_box(OperatingSystemFamily::Unix), false))
        });
        group.bench_with_input(
            BenchmarkId::new("special_windows", args),
            &special,
            |b, cmd| b.iter(|| cmd.to_command_line(black_box(OperatingSystemFamily::Windows), false)),
        );
        group.bench_with_input(
            BenchmarkId::new("special_for_logging", args),
            &special,
            |b, cmd| b.iter(|| cmd.to_command_line(black_box(OperatingSystemFamily::Windows), true)),
        );
    }

    group.finish();
}

fn bench_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("cmdline_nested");

    for depth in [1usize, 3, 6] {
        let cmd = generate_nested_command(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &cmd, |b, cmd| {
            b.iter(|| cmd.to_command_line(black_box(OperatingSystemFamily::Unix), false))
        });
    }

    group.finish();
}

// ============================================================================
// SOAP Envelopes
// ============================================================================

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let settings = settings();
    let options = [
        ("WINRS_CONSOLEMODE_STDIN", "TRUE".to_string()),
        ("WINRS_SKIP_CMD_SHELL", "FALSE".to_string()),
    ];

    group.bench_function("command", |b| {
        let body = soap::command_body("dir \"C:\\Program Files\" /s & echo <done>");
        b.iter(|| {
            soap::envelope(
                black_box(&settings),
                SoapAction::CommandLine,
                Some("SHELL-1"),
                &options,
                &body,
            )
        })
    });

    group.bench_function("receive", |b| {
        let body = soap::receive_body("CMD-1");
        b.iter(|| soap::envelope(black_box(&settings), SoapAction::Receive, Some("SHELL-1"), &[], &body))
    });

    let input = vec![b'x'; 1024];
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("send_1k", |b| {
        b.iter(|| {
            let body = soap::send_body("CMD-1", black_box(&input));
            soap::envelope(&settings, SoapAction::Send, Some("SHELL-1"), &[], &body)
        })
    });

    group.finish();
}

fn bench_response_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_response_scan");

    for streams in [1usize, 16, 128] {
        let document = generate_receive_response(streams);
        group.throughput(Throughput::Bytes(document.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(streams), &document, |b, doc| {
            b.iter(|| soap::response_body(black_box(doc)).map(|body| body.find_all("Stream").len()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encoding,
    bench_nested,
    bench_envelope,
    bench_response_scan
);
criterion_main!(benches);
