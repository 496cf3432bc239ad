//! Fuzz target for the SOAP response scanner.
//!
//! Server responses are untrusted input. Scanning them must never panic,
//! whatever nesting, comments, CDATA sections or broken tags they contain.

#![no_main]

use libfuzzer_sys::fuzz_target;

use hostsession::connection::winrm::soap;

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(body) = soap::response_body(xml) {
        for stream in body.find_all("Stream") {
            let _ = stream.attribute("Name");
            let _ = stream.text();
        }
        if let Some(state) = body.find("CommandState") {
            let _ = state.attribute("State");
            let _ = state.find("ExitCode").map(|code| code.text());
        }
    }

    for selector in soap::find_all(xml, "Selector") {
        let _ = selector.attribute("Name");
        let _ = selector.text();
    }

    let unescaped = soap::xml_unescape(xml);
    assert_eq!(soap::xml_unescape(&soap::xml_escape(&unescaped)), unescaped);
});
