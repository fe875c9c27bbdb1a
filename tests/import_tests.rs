use std::fs;
use std::path::Path;

use bffpp::{ImportError, Importer, Registry};

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|e| panic!("cannot create {}: {e}", parent.display()));
    }
    fs::write(&path, contents).unwrap_or_else(|e| panic!("cannot write {}: {e}", path.display()));
}

#[test]
fn imports_are_inlined_relative_to_the_importer() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "main.bf", "#import \"lib/inc.bf\"\n  @1@1.  \n");
    write(dir.path(), "lib/inc.bf", ":1+:\n");

    let mut importer = Importer::new();
    let source = importer.load(dir.path().join("main.bf"))?;
    assert_eq!(source, ":1+:\n@1@1.");

    let mut output = vec![];
    bffpp::run(&source, &Registry::new(), &b""[..], &mut output)?;
    assert_eq!(output, [2]);
    Ok(())
}

#[test]
fn each_file_is_loaded_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "main.bf", "#import \"a.bf\"\n#import \"b.bf\"\n.");
    write(dir.path(), "a.bf", "#import \"common.bf\"\n+");
    write(dir.path(), "b.bf", "#import \"common.bf\"\n+");
    write(dir.path(), "common.bf", "++");

    let mut importer = Importer::new();
    let source = importer.load(dir.path().join("main.bf"))?;
    assert_eq!(source.matches('+').count(), 4);
    assert_eq!(importer.loaded().count(), 4);
    Ok(())
}

#[test]
fn import_cycles_terminate() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "a.bf", "#import \"b.bf\"\n+");
    write(dir.path(), "b.bf", "#import \"a.bf\"\n-");

    let mut importer = Importer::new();
    let source = importer.load(dir.path().join("a.bf"))?;
    assert_eq!(source, "\n-\n+");
    Ok(())
}

#[test]
fn missing_import_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "main.bf", "#import \"nowhere.bf\"\n");

    let err = Importer::new()
        .load(dir.path().join("main.bf"))
        .expect_err("missing file must fail");
    assert!(matches!(err, ImportError::Read { ref path, .. } if path.ends_with("nowhere.bf")));
    Ok(())
}

#[test]
fn malformed_import_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "main.bf", "+\n#import nowhere.bf\n");

    let err = Importer::new()
        .load(dir.path().join("main.bf"))
        .expect_err("malformed import must fail");
    assert!(matches!(err, ImportError::Malformed { line: 2, .. }));
    Ok(())
}
