use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf_ingest_core::{
    CharacterNgramEmbedder, InMemoryVectorStore, IngestionOptions, LopdfExtractor, Outcome,
    Pipeline, PdfExtractor, Stage,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn build_pdf(title: &str, lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encodable content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serializable pdf");
    bytes
}

fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write fixture");
    path
}

fn pipeline() -> Pipeline<LopdfExtractor, CharacterNgramEmbedder, InMemoryVectorStore> {
    let options = IngestionOptions {
        chunk_size: 40,
        chunk_overlap: 8,
        ..IngestionOptions::default()
    };
    Pipeline::new(
        options,
        LopdfExtractor,
        CharacterNgramEmbedder::default(),
        InMemoryVectorStore::new(),
    )
    .expect("valid options")
}

#[test]
fn lopdf_extractor_reads_text_and_title() {
    let bytes = build_pdf("Pump Manual", &["Hydraulic pump maintenance"]);
    let extracted = LopdfExtractor.extract(&bytes).expect("readable pdf");

    assert!(extracted.text.contains("Hydraulic"));
    assert_eq!(extracted.metadata.page_count, 1);
    assert_eq!(extracted.metadata.title.as_deref(), Some("Pump Manual"));
}

#[tokio::test]
async fn batch_with_a_corrupt_file_reports_every_input() {
    let dir = tempdir().expect("tempdir");
    let first = build_pdf(
        "First",
        &["Replace the seal kit every 500 hours", "Check the relief valve"],
    );
    let third = build_pdf("Third", &["Bleed air from the hydraulic lines before start-up"]);
    let paths = vec![
        write(dir.path(), "1-first.pdf", &first),
        write(dir.path(), "2-corrupt.pdf", b"%PDF-1.4\n%broken"),
        write(dir.path(), "3-third.pdf", &third),
    ];
    let pipeline = pipeline();

    let results = pipeline.process_batch(&paths).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].outcome, Outcome::Stored);
    assert!(results[0].chunk_count > 0);
    assert_eq!(results[1].failed_stage(), Some(Stage::Extract));
    assert_eq!(results[2].outcome, Outcome::Stored);
    assert_eq!(pipeline.store().hashes().len(), 2);
}

#[tokio::test]
async fn reingesting_a_renamed_copy_is_skipped() {
    let dir = tempdir().expect("tempdir");
    let bytes = build_pdf("Manual", &["Torque the flange bolts in a star pattern"]);
    let original = write(dir.path(), "manual.pdf", &bytes);
    let pipeline = pipeline();

    let first = pipeline.process(&original).await;
    let stored = pipeline.store().len();

    let renamed = dir.path().join("manual-v1.pdf");
    fs::rename(&original, &renamed).expect("rename fixture");
    let second = pipeline.process(&renamed).await;

    assert_eq!(first.outcome, Outcome::Stored);
    assert_eq!(second.outcome, Outcome::Skipped);
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(pipeline.store().len(), stored);
}

#[tokio::test]
async fn stored_chunks_are_searchable() {
    let dir = tempdir().expect("tempdir");
    let bytes = build_pdf("Manual", &["Lubricate the bearings with lithium grease"]);
    let path = write(dir.path(), "bearings.pdf", &bytes);
    let pipeline = pipeline();

    pipeline.process(&path).await;
    let hits = pipeline.search("lithium grease bearings", 3).await.expect("search");

    assert!(!hits.is_empty());
    assert!(hits[0].source_path.ends_with("bearings.pdf"));
}
