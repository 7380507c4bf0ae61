//! Configuration directives consumed from the config layer (§6).
//!
//! The surrounding config-file reader is out of scope (§1); this module is
//! the narrow seam it calls into once it has split a directive line into a
//! name and its raw arguments. Grounded in §6's two directive descriptions;
//! `PredicateDefine`'s own argument parsing reuses `parser.rs` exactly as
//! SPEC_FULL.md's ambient-stack section prescribes.

use bitflags::bitflags;
use std::io::Write as _;

use crate::{
    context::ConfigContext,
    error::{PredicateError, Result},
};

bitflags! {
    /// Which lifecycle checkpoints a `PredicateDebugReport` directive's
    /// report gets written at (§4.4: "before-transform, after-transform").
    /// A bitflag set rather than a bool pair because a future checkpoint
    /// (e.g. post-index) should be addable without changing every call
    /// site's signature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugCheckpoints: u8 {
        const BEFORE_TRANSFORM = 0b01;
        const AFTER_TRANSFORM  = 0b10;
    }
}

impl Default for DebugCheckpoints {
    fn default() -> Self {
        DebugCheckpoints::BEFORE_TRANSFORM | DebugCheckpoints::AFTER_TRANSFORM
    }
}

/// Where a `PredicateDebugReport <path>` directive writes its dump: stderr
/// when `path` is empty or `-`, otherwise appended to the named file.
pub enum DebugReportSink {
    Stderr,
    File(std::path::PathBuf),
}

impl DebugReportSink {
    pub fn parse(path: &str) -> Self {
        if path.is_empty() || path == "-" {
            DebugReportSink::Stderr
        } else {
            DebugReportSink::File(std::path::PathBuf::from(path))
        }
    }

    /// Writes `report` to this sink, appending if it names a file.
    pub fn write(&self, report: &str) -> std::io::Result<()> {
        match self {
            DebugReportSink::Stderr => {
                eprint!("{report}");
                Ok(())
            }
            DebugReportSink::File(path) => {
                let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(report.as_bytes())
            }
        }
    }
}

/// `PredicateDebugReport <path>` (§6). Scoped to the current context: the
/// caller is expected to re-apply it to each child context it wants the
/// same dump behavior in, since contexts are independent, full-copy
/// configuration objects (§9 "Copy-on-context-open").
pub fn apply_debug_report_directive(args: &[&str]) -> Result<DebugReportSink> {
    match args {
        [path] => Ok(DebugReportSink::parse(path)),
        _ => Err(PredicateError::InvalidState {
            message: format!(
                "PredicateDebugReport takes exactly 1 argument, got {}",
                args.len()
            ),
        }),
    }
}

/// `PredicateDefine <name> <space-separated-args> <body-sexpr>` (§6).
/// Errors if the directive does not have exactly 3 arguments, if `name`
/// already names a call, or if `body-sexpr` fails to parse (§4.5).
pub fn apply_define_directive(ctx: &mut ConfigContext, args: &[&str], origin: &str) -> Result<()> {
    let [name, param_list, body] = args else {
        return Err(PredicateError::InvalidState {
            message: format!("PredicateDefine takes exactly 3 arguments, got {}", args.len()),
        });
    };
    let params: Vec<&str> = param_list.split(' ').filter(|s| !s.is_empty()).collect();
    ctx.define_template(name, &params, body, origin)
}

/// Writes `graph`'s debug report (§4.3 `write_debug_report`) to `sink` if
/// `checkpoint` is enabled in `at`, tagging the dump with which checkpoint
/// produced it.
pub fn maybe_write_checkpoint(
    graph: &crate::graph::MergeGraph,
    sink: &DebugReportSink,
    at: DebugCheckpoints,
    checkpoint: DebugCheckpoints,
) -> Result<()> {
    if !at.contains(checkpoint) {
        return Ok(());
    }
    let mut out = String::new();
    out.push_str(&format!("--- predicate debug report ({checkpoint:?}) ---\n"));
    graph.write_debug_report(&mut out)?;
    sink.write(&out).map_err(|e| PredicateError::InvalidState {
        message: format!("failed writing debug report: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls;

    #[test]
    fn debug_report_directive_defaults_to_stderr() {
        assert!(matches!(apply_debug_report_directive(&["-"]).unwrap(), DebugReportSink::Stderr));
        assert!(matches!(apply_debug_report_directive(&[""]).unwrap(), DebugReportSink::Stderr));
        assert!(matches!(
            apply_debug_report_directive(&["/tmp/foo"]).unwrap(),
            DebugReportSink::File(_)
        ));
    }

    #[test]
    fn debug_report_directive_rejects_wrong_arity() {
        assert!(apply_debug_report_directive(&[]).is_err());
        assert!(apply_debug_report_directive(&["a", "b"]).is_err());
    }

    #[test]
    fn define_directive_registers_a_template() {
        let mut ctx = ConfigContext::new();
        calls::register_demo_calls(ctx.call_factory_mut()).unwrap();
        apply_define_directive(
            &mut ctx,
            &["is_bad", "x", "(or (streq (ref 'x') 'evil') (streq (ref 'x') 'bad'))"],
            "test.conf:1",
        )
        .unwrap();
        assert!(ctx.call_factory().contains(crate::symbol::intern("is_bad")));
    }

    #[test]
    fn define_directive_rejects_wrong_arity() {
        let mut ctx = ConfigContext::new();
        let err = apply_define_directive(&mut ctx, &["only_one_arg"], "test.conf:1").unwrap_err();
        assert!(matches!(err, PredicateError::InvalidState { .. }));
    }
}
