use assert_cmd::Command;
use tempfile::TempDir;

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn help_lists_positional_inputs_and_run_options() {
    let output = Command::new(assert_cmd::cargo::cargo_bin!("seqcert"))
        .arg("--help")
        .output()
        .expect("--help runs");

    assert!(output.status.success());
    let text = combined_output(&output);
    for needle in [
        "SOURCE_DIRECTORY",
        "DESTINATION",
        "--report",
        "--workers",
        "--tool-timeout-secs",
        "--ffmpeg",
        "--ffprobe",
        "--progress",
    ] {
        assert!(text.contains(needle), "help text missing {needle}: {text}");
    }
}

#[test]
fn missing_source_directory_is_rejected_up_front() {
    let tmp = TempDir::new().expect("tempdir");
    let output = Command::new(assert_cmd::cargo::cargo_bin!("seqcert"))
        .arg(tmp.path().join("does-not-exist"))
        .arg(tmp.path().join("out"))
        .output()
        .expect("runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("is not a directory"), "unexpected output: {text}");
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn unusable_ffmpeg_fails_startup_with_context() {
    let tmp = TempDir::new().expect("tempdir");
    let output = Command::new(assert_cmd::cargo::cargo_bin!("seqcert"))
        .arg(tmp.path())
        .arg(tmp.path().join("out"))
        .arg("--ffmpeg")
        .arg("definitely-not-a-real-ffmpeg")
        .output()
        .expect("runs");

    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("ffmpeg/ffprobe not usable"),
        "missing startup context: {text}"
    );
}
