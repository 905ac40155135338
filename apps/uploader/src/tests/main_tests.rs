use super::*;
use std::sync::Arc;

fn record(name: &str, needs_upload: bool) -> FileRecord {
    FileRecord::new(Arc::new(SelectedFile::new(name, vec![1u8; 8])), needs_upload)
}

#[test]
fn parses_header_pairs() {
    assert_eq!(
        parse_header("Authorization=Bearer abc").expect("header"),
        ("Authorization".to_string(), "Bearer abc".to_string())
    );
    assert_eq!(
        parse_header("x-token = a=b").expect("header"),
        ("x-token".to_string(), "a=b".to_string())
    );
    assert!(parse_header("no-separator").is_err());
    assert!(parse_header("=value").is_err());
}

#[test]
fn cli_flags_override_options() {
    let args = Args::try_parse_from([
        "uploader",
        "--url",
        "https://files.example/upload",
        "--multiple",
        "3",
        "--max-size",
        "1024",
        "--header",
        "x-token=abc",
        "a.txt",
        "b.txt",
    ])
    .expect("args");

    let mut options = UploadOptions::default();
    args.apply_to(&mut options);

    assert_eq!(options.url.as_deref(), Some("https://files.example/upload"));
    assert_eq!(options.multiple, Multiplicity::AtMost(3));
    assert_eq!(options.max_size, Some(1024));
    assert_eq!(options.headers.get("x-token").map(String::as_str), Some("abc"));
    assert_eq!(args.files.len(), 2);
}

#[test]
fn files_are_required() {
    assert!(Args::try_parse_from(["uploader"]).is_err());
}

#[test]
fn settled_when_every_record_is_terminal() {
    assert!(is_settled(&None));
    assert!(is_settled(&Some(vec![record("a.txt", false)])));
    assert!(!is_settled(&Some(vec![
        record("a.txt", false),
        record("b.txt", true)
    ])));
}

#[test]
fn printer_reports_only_changes() {
    let mut printer = ProgressPrinter::default();
    let pending = record("report.pdf", true).in_progress();
    let list = Some(vec![pending.clone()]);

    assert_eq!(printer.changed_lines(&list).len(), 1);
    assert!(printer.changed_lines(&list).is_empty());

    let advanced = Some(vec![pending.with_progress(42.5)]);
    let lines = printer.changed_lines(&advanced);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("report.pdf"));
    assert!(lines[0].contains("pdf"));
    assert!(lines[0].contains("42.50%"));
}

#[test]
fn rendered_line_includes_remote_url() {
    let done = record("a.png", true).succeeded(Some("https://cdn.example/a.png".to_string()));
    let line = render_record(0, &done);
    assert!(line.contains("success"));
    assert!(line.ends_with("https://cdn.example/a.png"));
}
