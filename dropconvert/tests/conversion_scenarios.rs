//! End-to-end conversion scenarios.
//!
//! Scripted runs cover every host; the `real` module drives `/bin/sh` as the
//! interpreter so exchange artifacts, exit codes and timeouts go through real
//! child processes.

use std::sync::Arc;

use dropconvert::bootstrap::BootstrapReport;
use dropconvert::error::{AbortReason, ConversionFailure};
use dropconvert::intake::classify;
use dropconvert::io::config::BridgeConfig;
use dropconvert::io::process::ProcessInvoker;
use dropconvert::orchestrator::{ConversionOrchestrator, ConversionOutcome, ConversionSettings};
use dropconvert::test_support::{
    MemorySink, ScriptedInvoker, ScriptedRun, TestWorkspace, ready_report, unavailable_report,
};

fn orchestrator(
    config: &BridgeConfig,
    report: BootstrapReport,
    invoker: Arc<dyn ProcessInvoker>,
    sink: Arc<MemorySink>,
) -> ConversionOrchestrator {
    let settings = ConversionSettings::from_config(config).expect("settings");
    ConversionOrchestrator::new(settings, report, invoker, sink)
}

#[test]
fn traversal_path_is_rejected_alongside_valid_inputs() {
    let ws = TestWorkspace::new().expect("workspace");
    let file = ws.input_file("notes.docx", "x").expect("file");
    let dir = ws.input_dir("slides").expect("dir");
    let sink = MemorySink::new();

    let raw = vec![
        file.to_string_lossy().into_owned(),
        dir.to_string_lossy().into_owned(),
        "../../etc".to_string(),
    ];
    let batch = classify(&raw, &sink);

    assert_eq!(batch.files().len(), 1);
    assert_eq!(batch.directories().len(), 1);
    assert_eq!(batch.rejected().len(), 1);
    assert_eq!(batch.rejected()[0].original, "../../etc");
    assert!(sink.contains("Invalid path rejected: ../../etc"));
}

#[test]
fn successful_run_logs_output_and_leaves_no_artifacts() {
    let ws = TestWorkspace::new().expect("workspace");
    let file = ws.input_file("a.docx", "x").expect("file");
    let dir = ws.input_dir("folder").expect("dir");
    let sink = Arc::new(MemorySink::new());
    let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedRun::ok(
        "3 files converted\n",
    )]));
    let batch = classify(
        &[file.to_string_lossy(), dir.to_string_lossy()],
        sink.as_ref(),
    );

    let outcome = orchestrator(&ws.config(), ready_report("python"), invoker.clone(), sink.clone())
        .convert(&batch);

    match outcome {
        ConversionOutcome::Succeeded(report) => {
            assert_eq!(report.stdout, "3 files converted\n");
            assert_eq!((report.files, report.directories), (1, 1));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(sink.contains("3 files converted"));
    assert!(sink.contains("Conversion finished successfully"));
    assert!(sink.contains("Processing 1 file(s) and 1 folder(s)"));

    let call = &invoker.calls()[0];
    let folders: Vec<String> = serde_json::from_str(&call.file_args[2].1).expect("folders json");
    assert_eq!(folders.len(), 1);
    assert!(folders[0].ends_with("folder"));
    assert_eq!(ws.exchange_entries().expect("entries"), 0);
}

#[test]
fn unavailable_environment_never_creates_artifacts() {
    let ws = TestWorkspace::new().expect("workspace");
    let file = ws.input_file("a.docx", "x").expect("file");
    let sink = Arc::new(MemorySink::new());
    let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedRun::ok("unused")]));
    let batch = classify(&[file.to_string_lossy()], sink.as_ref());

    let outcome = orchestrator(&ws.config(), unavailable_report(), invoker.clone(), sink.clone())
        .convert(&batch);

    assert_eq!(
        outcome,
        ConversionOutcome::Aborted(AbortReason::EnvironmentUnavailable)
    );
    assert!(sink.contains("Conversion aborted"));
    assert_eq!(invoker.call_count(), 0);
    assert_eq!(ws.exchange_entries().expect("entries"), 0);
}

#[test]
fn nonzero_exit_logs_stderr_verbatim_and_cleans_up() {
    let ws = TestWorkspace::new().expect("workspace");
    let file = ws.input_file("a.xyz", "x").expect("file");
    let sink = Arc::new(MemorySink::new());
    let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedRun::exit(
        1,
        "",
        "unsupported format: .xyz",
    )]));
    let batch = classify(&[file.to_string_lossy()], sink.as_ref());

    let outcome = orchestrator(&ws.config(), ready_report("python"), invoker.clone(), sink.clone())
        .convert(&batch);

    match outcome {
        ConversionOutcome::Failed(ConversionFailure::NonZeroExit { code, stderr, .. }) => {
            assert_eq!(code, 1);
            assert_eq!(stderr, "unsupported format: .xyz");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(sink.contains("unsupported format: .xyz"));
    // Both artifacts existed while the entrypoint ran.
    assert_eq!(invoker.calls()[0].file_args.len(), 3);
    assert_eq!(ws.exchange_entries().expect("entries"), 0);
}

#[test]
fn timed_out_run_still_cleans_up() {
    let ws = TestWorkspace::new().expect("workspace");
    let file = ws.input_file("big.pdf", "x").expect("file");
    let sink = Arc::new(MemorySink::new());
    let invoker = Arc::new(ScriptedInvoker::new(vec![ScriptedRun::timed_out()]));
    let batch = classify(&[file.to_string_lossy()], sink.as_ref());

    let outcome = orchestrator(&ws.config(), ready_report("python"), invoker, sink.clone())
        .convert(&batch);

    assert!(matches!(
        outcome,
        ConversionOutcome::Failed(ConversionFailure::TimedOut { .. })
    ));
    assert!(sink.contains("Conversion timed out after 30000ms"));
    assert_eq!(ws.exchange_entries().expect("entries"), 0);
}

#[cfg(unix)]
mod real {
    use std::time::{Duration, Instant};

    use dropconvert::io::process::SystemInvoker;

    use super::*;

    fn shell_orchestrator(
        ws: &TestWorkspace,
        script: &str,
        timeout_ms: u64,
        sink: Arc<MemorySink>,
    ) -> ConversionOrchestrator {
        ws.write_entrypoint(script).expect("entrypoint");
        let mut config = ws.config();
        config.entrypoint.timeout_ms = timeout_ms;
        orchestrator(
            &config,
            ready_report("/bin/sh"),
            Arc::new(SystemInvoker::default()),
            sink,
        )
    }

    #[test]
    fn entrypoint_reads_path_lists_from_its_arguments() {
        let ws = TestWorkspace::new().expect("workspace");
        let file = ws.input_file("it's a $file;.docx", "x").expect("file");
        let sink = Arc::new(MemorySink::new());
        let orchestrator = shell_orchestrator(
            &ws,
            "cat \"$1\"\necho\ncat \"$2\"\necho\npwd\n",
            10_000,
            sink.clone(),
        );
        let batch = classify(&[file.to_string_lossy()], sink.as_ref());

        let outcome = orchestrator.convert(&batch);

        let report = match outcome {
            ConversionOutcome::Succeeded(report) => report,
            other => panic!("unexpected outcome {other:?}"),
        };
        let mut lines = report.stdout.lines();
        let files: Vec<String> =
            serde_json::from_str(lines.next().expect("files line")).expect("files json");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("it's a $file;.docx"));
        assert_eq!(lines.next(), Some("[]"));
        let cwd = std::fs::canonicalize(lines.next().expect("pwd line")).expect("canonical cwd");
        assert_eq!(cwd, std::fs::canonicalize(ws.working_dir()).expect("canonical work"));
        assert_eq!(ws.exchange_entries().expect("entries"), 0);
    }

    #[test]
    fn real_nonzero_exit_keeps_stderr() {
        let ws = TestWorkspace::new().expect("workspace");
        let file = ws.input_file("a.xyz", "x").expect("file");
        let sink = Arc::new(MemorySink::new());
        let orchestrator = shell_orchestrator(
            &ws,
            "echo 'unsupported format: .xyz' >&2\nexit 1\n",
            10_000,
            sink.clone(),
        );
        let batch = classify(&[file.to_string_lossy()], sink.as_ref());

        let outcome = orchestrator.convert(&batch);

        match outcome {
            ConversionOutcome::Failed(ConversionFailure::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 1);
                assert_eq!(stderr.trim_end(), "unsupported format: .xyz");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(sink.contains("Entrypoint error output:\nunsupported format: .xyz"));
        assert_eq!(ws.exchange_entries().expect("entries"), 0);
    }

    #[test]
    fn real_timeout_kills_the_entrypoint_and_cleans_up() {
        let ws = TestWorkspace::new().expect("workspace");
        let file = ws.input_file("a.docx", "x").expect("file");
        let sink = Arc::new(MemorySink::new());
        let orchestrator = shell_orchestrator(&ws, "exec sleep 30\n", 300, sink.clone());
        let batch = classify(&[file.to_string_lossy()], sink.as_ref());

        let started = Instant::now();
        let outcome = orchestrator.convert(&batch);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            outcome,
            ConversionOutcome::Failed(ConversionFailure::TimedOut { .. })
        ));
        assert_eq!(ws.exchange_entries().expect("entries"), 0);
    }
}
