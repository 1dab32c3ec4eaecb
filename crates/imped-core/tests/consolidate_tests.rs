use imped_core::{ConsolidateError, Consolidator, VerificationResult};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

fn result_in(dir: &Path, id: &str, name: &str) -> VerificationResult {
    VerificationResult {
        id: id.to_string(),
        name: name.to_string(),
        birth_date: "01/02/1990".to_string(),
        has_impediment: Some("NO".to_string()),
        temp_dir: Some(dir.join(id)),
    }
}

#[tokio::test]
async fn moves_two_artifacts_and_removes_temp_dirs() {
    let root = tempfile::tempdir().unwrap();
    let temp = root.path().join("temp");
    let output = root.path().join("out");

    let a = result_in(&temp, "1", "PEREZ LOPEZ JUAN");
    let b = result_in(&temp, "2", "ANA MARÍA");
    for (result, body) in [(&a, "a"), (&b, "b")] {
        let dir = result.temp_dir.as_ref().unwrap();
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("Certificado.pdf"), body).unwrap();
    }

    let consolidation = Consolidator::new(&output).consolidate(&[a, b]).await;

    assert!(consolidation.failures.is_empty());
    assert_eq!(consolidation.paths.len(), 2);
    assert_eq!(
        consolidation.paths.get("1"),
        Some(&PathBuf::from("PEREZ_LOPEZ_JUAN.pdf"))
    );
    assert_eq!(consolidation.paths.get("2"), Some(&PathBuf::from("ANA_MARÍA.pdf")));
    assert_eq!(std::fs::read_to_string(output.join("PEREZ_LOPEZ_JUAN.pdf")).unwrap(), "a");
    assert_eq!(std::fs::read_to_string(output.join("ANA_MARÍA.pdf")).unwrap(), "b");
    assert!(!temp.join("1").exists());
    assert!(!temp.join("2").exists());
}

#[tokio::test]
async fn empty_temp_dir_is_skipped_without_error() {
    let root = tempfile::tempdir().unwrap();
    let temp = root.path().join("temp");
    let result = result_in(&temp, "7", "VACIO");
    std::fs::create_dir_all(result.temp_dir.as_ref().unwrap()).unwrap();

    let consolidation = Consolidator::new(root.path().join("out"))
        .consolidate(&[result])
        .await;

    assert!(consolidation.paths.is_empty());
    assert!(consolidation.failures.is_empty());
    assert_eq!(consolidation.skipped, vec!["7".to_string()]);
}

#[tokio::test]
async fn partial_download_is_not_consolidated() {
    let root = tempfile::tempdir().unwrap();
    let temp = root.path().join("temp");
    let result = result_in(&temp, "8", "PARCIAL");
    let dir = result.temp_dir.clone().unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("Certificado.pdf.crdownload"), "half").unwrap();

    let consolidation = Consolidator::new(root.path().join("out"))
        .consolidate(&[result])
        .await;
    assert_eq!(consolidation.skipped, vec!["8".to_string()]);
}

#[tokio::test]
async fn consolidating_twice_reports_missing_source() {
    let root = tempfile::tempdir().unwrap();
    let temp = root.path().join("temp");
    let result = result_in(&temp, "3", "DOBLE");
    let dir = result.temp_dir.clone().unwrap();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("c.pdf"), "x").unwrap();

    let consolidator = Consolidator::new(root.path().join("out"));
    let first = consolidator.consolidate(std::slice::from_ref(&result)).await;
    assert_eq!(first.paths.len(), 1);

    let second = consolidator.consolidate(&[result]).await;
    assert!(second.paths.is_empty());
    assert!(matches!(
        second.failures.as_slice(),
        [(id, ConsolidateError::MissingTempDir { .. })] if id == "3"
    ));
}

#[tokio::test]
async fn colliding_names_overwrite() {
    let root = tempfile::tempdir().unwrap();
    let temp = root.path().join("temp");
    let output = root.path().join("out");
    let a = result_in(&temp, "1", "JUAN PEREZ");
    let b = result_in(&temp, "2", "JUAN  PEREZ");
    for (result, body) in [(&a, "first"), (&b, "second")] {
        let dir = result.temp_dir.as_ref().unwrap();
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("c.pdf"), body).unwrap();
    }

    let consolidation = Consolidator::new(&output).consolidate(&[a, b]).await;

    assert_eq!(consolidation.paths.get("1"), consolidation.paths.get("2"));
    assert_eq!(
        std::fs::read_to_string(output.join("JUAN_PEREZ.pdf")).unwrap(),
        "second"
    );
}
