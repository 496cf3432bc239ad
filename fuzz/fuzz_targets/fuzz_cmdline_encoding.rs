//! Fuzz target for command-line encoding.
//!
//! Builds arbitrary command lines, including nested ones, and checks that
//! encoding never panics and that secrets never reach the logging form.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use hostsession::cmdline::{CmdLine, CmdLineArgument, SECRET_MASK};
use hostsession::os::OperatingSystemFamily;

#[derive(Debug, Clone, Arbitrary)]
enum FuzzArgument {
    Literal(String),
    Secret(String),
    Raw(String),
    Nested(Vec<String>),
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzCmdLine {
    arguments: Vec<FuzzArgument>,
}

fn build(input: &FuzzCmdLine) -> CmdLine {
    let mut cmd = CmdLine::new();
    for arg in &input.arguments {
        match arg {
            FuzzArgument::Literal(text) => cmd.push(CmdLineArgument::Literal(text.clone())),
            FuzzArgument::Secret(text) => cmd.push(CmdLineArgument::Secret(text.clone())),
            FuzzArgument::Raw(text) => cmd.push(CmdLineArgument::Raw(text.clone())),
            FuzzArgument::Nested(args) => {
                cmd.push(CmdLineArgument::Nested(CmdLine::build(args.iter().cloned())))
            }
        };
    }
    cmd
}

fuzz_target!(|input: FuzzCmdLine| {
    let cmd = build(&input);

    for os in [
        OperatingSystemFamily::Unix,
        OperatingSystemFamily::Windows,
        OperatingSystemFamily::Zos,
    ] {
        let Ok(array) = cmd.to_command_array(os, true) else {
            continue;
        };
        for (arg, encoded) in cmd.arguments().iter().zip(&array) {
            if let CmdLineArgument::Secret(_) = arg {
                assert_eq!(encoded, SECRET_MASK);
            }
        }
        let _ = cmd.to_command_line(os, false);
    }
});
