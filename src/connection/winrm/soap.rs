//! SOAP envelopes for the WS-Management remote shell.
//!
//! Requests are rendered from templates; responses are read with a small
//! element scanner that matches on local names, so namespace prefixes chosen
//! by the server do not matter.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use uuid::Uuid;

// ============================================================================
// Namespaces and URIs
// ============================================================================

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

/// Resource URI of the `cmd` remote shell.
pub const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

/// Signal code that terminates a running command.
pub const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// Suffix of the `State` attribute of a finished command.
pub const COMMAND_STATE_DONE_SUFFIX: &str = "/CommandState/Done";

/// The operations of the remote shell protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapAction {
    /// Create a shell.
    Shell,
    /// Start a command in a shell.
    CommandLine,
    /// Poll command output.
    Receive,
    /// Feed command input.
    Send,
    /// Signal a command.
    Signal,
    /// Delete a shell.
    Delete,
}

impl SoapAction {
    /// The `Action` header and `SOAPAction` value of this operation.
    pub fn uri(self) -> &'static str {
        match self {
            SoapAction::Shell => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            SoapAction::CommandLine => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command"
            }
            SoapAction::Receive => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive"
            }
            SoapAction::Send => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send",
            SoapAction::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
            SoapAction::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
        }
    }
}

impl std::fmt::Display for SoapAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SoapAction::Shell => "Shell",
            SoapAction::CommandLine => "CommandLine",
            SoapAction::Receive => "Receive",
            SoapAction::Send => "Send",
            SoapAction::Signal => "Signal",
            SoapAction::Delete => "Delete",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Request rendering
// ============================================================================

/// Header values shared by every request of a client.
#[derive(Debug, Clone)]
pub struct EnvelopeSettings {
    /// Endpoint URL, sent as `a:To`
    pub to: String,
    /// `MaxEnvelopeSize` header
    pub max_envelope_size: u32,
    /// `Locale` header
    pub locale: String,
    /// `OperationTimeout` header
    pub operation_timeout: String,
}

/// Render a complete request envelope.
///
/// `shell_id` becomes the `ShellId` selector and `options` the option set;
/// both are left out when absent or empty.
pub fn envelope(
    settings: &EnvelopeSettings,
    action: SoapAction,
    shell_id: Option<&str>,
    options: &[(&str, String)],
    body: &str,
) -> String {
    let selector_set = shell_id
        .map(|id| {
            format!(
                r#"
    <w:SelectorSet>
      <w:Selector Name="ShellId">{}</w:Selector>
    </w:SelectorSet>"#,
                xml_escape(id)
            )
        })
        .unwrap_or_default();

    let option_set = if options.is_empty() {
        String::new()
    } else {
        let entries: String = options
            .iter()
            .map(|(name, value)| {
                format!(
                    "\n      <w:Option Name=\"{}\">{}</w:Option>",
                    name,
                    xml_escape(value)
                )
            })
            .collect();
        format!("\n    <w:OptionSet>{}\n    </w:OptionSet>", entries)
    };

    let body = if body.is_empty() {
        "<s:Body/>".to_string()
    } else {
        format!("<s:Body>\n{}\n  </s:Body>", body)
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header>
    <a:To>{to}</a:To>
    <a:ReplyTo>
      <a:Address s:mustUnderstand="true">{ANONYMOUS_ADDRESS}</a:Address>
    </a:ReplyTo>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{max_envelope_size}</w:MaxEnvelopeSize>
    <w:Locale xml:lang="{locale}" s:mustUnderstand="false"/>
    <w:OperationTimeout>{timeout}</w:OperationTimeout>{selector_set}{option_set}
  </s:Header>
  {body}
</s:Envelope>"#,
        to = xml_escape(&settings.to),
        message_id = Uuid::new_v4(),
        action = action.uri(),
        max_envelope_size = settings.max_envelope_size,
        locale = xml_escape(&settings.locale),
        timeout = xml_escape(&settings.operation_timeout),
    )
}

/// Body of a shell creation request.
pub fn shell_body() -> String {
    r#"    <rsp:Shell>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>"#
        .to_string()
}

/// Body of a command request.
///
/// The remote shell expects the command text wrapped in double quotes.
pub fn command_body(command: &str) -> String {
    format!(
        "    <rsp:CommandLine>\n      <rsp:Command>{}</rsp:Command>\n    </rsp:CommandLine>",
        xml_escape(&format!("\"{}\"", command))
    )
}

/// Body of an output poll for `command_id`.
pub fn receive_body(command_id: &str) -> String {
    format!(
        "    <rsp:Receive>\n      <rsp:DesiredStream CommandId=\"{}\">stdout stderr</rsp:DesiredStream>\n    </rsp:Receive>",
        xml_escape(command_id)
    )
}

/// Body carrying `data` to the stdin of `command_id`.
pub fn send_body(command_id: &str, data: &[u8]) -> String {
    format!(
        "    <rsp:Send>\n      <rsp:Stream Name=\"stdin\" CommandId=\"{}\">{}</rsp:Stream>\n    </rsp:Send>",
        xml_escape(command_id),
        BASE64_STANDARD.encode(data)
    )
}

/// Body of a terminate signal for `command_id`.
pub fn signal_body(command_id: &str) -> String {
    format!(
        "    <rsp:Signal CommandId=\"{}\">\n      <rsp:Code>{}</rsp:Code>\n    </rsp:Signal>",
        xml_escape(command_id),
        SIGNAL_TERMINATE
    )
}

/// Escape XML special characters
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Resolve entity and character references.
pub fn xml_unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let resolved = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Response scanning
// ============================================================================

/// An element found in a response document.
#[derive(Debug, Clone)]
pub struct Element<'a> {
    name: &'a str,
    attributes: Vec<(&'a str, String)>,
    inner: &'a str,
}

impl<'a> Element<'a> {
    /// Local name, without namespace prefix.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Value of the attribute with local name `name`.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Unescaped, trimmed text content.
    pub fn text(&self) -> String {
        let inner = self.inner.trim();
        match inner
            .strip_prefix("<![CDATA[")
            .and_then(|s| s.strip_suffix("]]>"))
        {
            Some(cdata) => cdata.to_string(),
            None => xml_unescape(inner),
        }
    }

    /// First descendant with local name `name`.
    pub fn find(&self, name: &str) -> Option<Element<'a>> {
        find_all(self.inner, name).into_iter().next()
    }

    /// All descendants with local name `name`, in document order.
    pub fn find_all(&self, name: &str) -> Vec<Element<'a>> {
        find_all(self.inner, name)
    }
}

/// A start tag as it appears in the document.
struct Tag<'a> {
    qualified: &'a str,
    attributes: &'a str,
    self_closing: bool,
    end: usize,
}

fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// Read the start tag beginning at `start` (which holds `<`).
fn read_tag(xml: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = xml.as_bytes();
    let name_start = start + 1;
    let mut i = name_start;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/'
    {
        i += 1;
    }
    let qualified = &xml[name_start..i];
    if qualified.is_empty() {
        return None;
    }

    let attributes_start = i;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(bytes[i]),
            (None, b'>') => {
                let self_closing = i > attributes_start && bytes[i - 1] == b'/';
                let attributes_end = if self_closing { i - 1 } else { i };
                return Some(Tag {
                    qualified,
                    attributes: &xml[attributes_start..attributes_end],
                    self_closing,
                    end: i + 1,
                });
            }
            (None, _) => {}
        }
        i += 1;
    }
    None
}

fn parse_attributes(source: &str) -> Vec<(&str, String)> {
    let mut attributes = Vec::new();
    let mut rest = source;
    loop {
        rest = rest.trim_start();
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(close) = after[1..].find(quote) else {
            break;
        };
        attributes.push((local_name(key), xml_unescape(&after[1..1 + close])));
        rest = &after[close + 2..];
    }
    attributes
}

/// Index just past the markup that starts at `at` and ends with `terminator`.
fn skip_past(xml: &str, at: usize, terminator: &str) -> usize {
    xml[at..]
        .find(terminator)
        .map(|i| at + i + terminator.len())
        .unwrap_or(xml.len())
}

/// Byte range of the content of the element whose start tag ends at `from`.
fn content_range(xml: &str, qualified: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut pos = from;
    while let Some(offset) = xml[pos..].find('<') {
        let at = pos + offset;
        let rest = &xml[at..];
        if let Some(closing) = rest.strip_prefix("</") {
            let end = closing.find('>')?;
            if closing[..end].trim() == qualified {
                depth -= 1;
                if depth == 0 {
                    return Some((from, at));
                }
            }
            pos = at + 2 + end + 1;
        } else if rest.starts_with("<!--") {
            pos = skip_past(xml, at, "-->");
        } else if rest.starts_with("<![CDATA[") {
            pos = skip_past(xml, at, "]]>");
        } else if rest.starts_with("<?") || rest.starts_with("<!") {
            pos = skip_past(xml, at, ">");
        } else {
            let tag = read_tag(xml, at)?;
            if tag.qualified == qualified && !tag.self_closing {
                depth += 1;
            }
            pos = tag.end;
        }
    }
    None
}

/// All elements with local name `name` in `xml`, in document order.
///
/// Elements whose end tag is missing are not reported.
pub fn find_all<'a>(xml: &'a str, name: &str) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(offset) = xml[pos..].find('<') {
        let at = pos + offset;
        let rest = &xml[at..];
        if rest.starts_with("</") {
            pos = skip_past(xml, at, ">");
            continue;
        }
        if rest.starts_with("<!--") {
            pos = skip_past(xml, at, "-->");
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            pos = skip_past(xml, at, "]]>");
            continue;
        }
        if rest.starts_with("<?") || rest.starts_with("<!") {
            pos = skip_past(xml, at, ">");
            continue;
        }
        let Some(tag) = read_tag(xml, at) else {
            break;
        };
        if local_name(tag.qualified) == name {
            let inner = if tag.self_closing {
                Some("")
            } else {
                content_range(xml, tag.qualified, tag.end).map(|(s, e)| &xml[s..e])
            };
            if let Some(inner) = inner {
                found.push(Element {
                    name: local_name(tag.qualified),
                    attributes: parse_attributes(tag.attributes),
                    inner,
                });
            }
        }
        pos = tag.end;
    }
    found
}

/// Locate the body of a response document.
///
/// Fails with a description when the document is not a SOAP envelope or
/// when the body carries a fault.
pub fn response_body(xml: &str) -> std::result::Result<Element<'_>, String> {
    let envelope = find_all(xml, "Envelope")
        .into_iter()
        .next()
        .ok_or_else(|| "Response is not a SOAP envelope".to_string())?;
    let body = envelope
        .find("Body")
        .ok_or_else(|| "SOAP envelope has no Body".to_string())?;

    if let Some(fault) = body.find("Fault") {
        let reason = fault
            .find("Reason")
            .and_then(|r| r.find("Text"))
            .or_else(|| fault.find("faultstring"))
            .map(|e| e.text())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "no reason given".to_string());
        let code = fault
            .find("Subcode")
            .and_then(|s| s.find("Value"))
            .map(|e| e.text());
        return Err(match code {
            Some(code) => format!("SOAP fault {}: {}", code, reason),
            None => format!("SOAP fault: {}", reason),
        });
    }

    Ok(body)
}
