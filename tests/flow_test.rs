use std::path::{Path, PathBuf};

use pdfpress::convert::DocumentConverter;
use pdfpress::error::ContextError;
use pdfpress::flow::{Command, ConversationFlow, FlowConfig, MessagingGateway, UserEvent};
use pdfpress::session::{ConversationId, SessionState};

/// Records every outbound interaction so that the scenarios can assert on the transcript.
/// Delivered documents are read eagerly because the flow deletes the file right after the
/// hand-over.
#[derive(Default)]
struct RecordingGateway {
    replies: Vec<String>,
    documents: Vec<(Vec<u8>, String)>,
    fail_delivery: bool,
}

impl MessagingGateway for RecordingGateway {
    fn reply(&mut self, _id: ConversationId, text: &str) {
        self.replies.push(text.to_string());
    }

    fn send_document(
        &mut self,
        _id: ConversationId,
        document_path: &Path,
        caption: &str,
    ) -> Result<(), ContextError> {
        if self.fail_delivery {
            return Err(ContextError::with_context("The delivery was refused"));
        }
        let bytes = std::fs::read(document_path).map_err(|error| {
            ContextError::with_error("Failed to read the delivered document", &error)
        })?;
        self.documents.push((bytes, caption.to_string()));
        Ok(())
    }
}

/// A converter double standing in for the external LibreOffice process.
struct StubConverter {
    succeed: bool,
}

impl DocumentConverter for StubConverter {
    fn convert(
        &self,
        input_path: &Path,
        output_directory: &Path,
    ) -> Result<PathBuf, ContextError> {
        if !self.succeed {
            return Err(ContextError::with_context(
                "No LibreOffice installation was found on this host",
            ));
        }
        let stem = input_path
            .file_stem()
            .expect("the staged input always has a file name")
            .to_string_lossy()
            .into_owned();
        let produced_path = output_directory.join(format!("{}.pdf", stem));
        std::fs::write(&produced_path, b"%PDF-1.5 converter stub")
            .map_err(|error| ContextError::with_error("Failed to write the stub output", &error))?;
        Ok(produced_path)
    }
}

fn flow_in(
    work_directory: &Path,
    converter: StubConverter,
) -> ConversationFlow<StubConverter> {
    let config = FlowConfig {
        work_directory: work_directory.to_path_buf(),
        font_candidate_paths: Vec::new(),
        ..FlowConfig::default()
    };
    ConversationFlow::with_converter(config, converter)
}

/// Writes a small PNG the way a gateway download would, the flow takes ownership of it.
fn staged_image(directory: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = directory.join(name);
    image::RgbImage::from_pixel(width, height, image::Rgb([120, 140, 160]))
        .save(&path)
        .unwrap();
    path
}

fn remaining_files(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn the_full_build_flow_delivers_a_pdf_and_cleans_up() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(10);

    let first = staged_image(work_directory.path(), "tmp_10_0.png", 640, 480);
    let second = staged_image(work_directory.path(), "tmp_10_1.png", 300, 500);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("Hello\nWorld".into()));
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: first.clone() });
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: second.clone() });
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));

    assert_eq!(gateway.documents.len(), 1);
    let (document_bytes, caption) = &gateway.documents[0];
    let pdf_document = lopdf::Document::load_mem(document_bytes).unwrap();
    assert!(!pdf_document.get_pages().is_empty());
    assert!(caption.contains("PDF"));

    // The acknowledgements carry the running image count
    assert!(gateway.replies.iter().any(|reply| reply.starts_with("Image 1 added")));
    assert!(gateway.replies.iter().any(|reply| reply.starts_with("Image 2 added")));

    // Both staged images, the result file and the session are gone
    assert!(!first.exists());
    assert!(!second.exists());
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
    assert!(!flow.store().contains(id).unwrap());
}

#[test]
fn a_text_only_build_yields_a_single_page_document() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(11);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("Hello\nWorld".into()));
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));

    assert_eq!(gateway.documents.len(), 1);
    let pdf_document = lopdf::Document::load_mem(&gateway.documents[0].0).unwrap();
    assert_eq!(pdf_document.get_pages().len(), 1);
}

#[test]
fn events_that_do_not_match_the_session_state_are_ignored() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(12);

    // No session exists: text, images and /done all fall through silently
    flow.handle_event(&mut gateway, id, UserEvent::Text("stray".into()));
    flow.handle_event(
        &mut gateway,
        id,
        UserEvent::Image {
            path: work_directory.path().join("missing.png"),
        },
    );
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));
    assert!(gateway.replies.is_empty());

    // An image while the session still awaits its text is ignored as well
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    let image = staged_image(work_directory.path(), "tmp_12_0.png", 64, 64);
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: image });
    assert_eq!(gateway.replies.len(), 1, "only the /newpdf prompt replied");
    let state = flow
        .store()
        .with_session(id, |session| session.state)
        .unwrap();
    assert_eq!(state, Some(SessionState::AwaitingText));
}

#[test]
fn cancelling_without_a_session_is_an_informational_reply() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();

    flow.handle_event(
        &mut gateway,
        ConversationId(13),
        UserEvent::Command(Command::Cancel),
    );

    assert_eq!(gateway.replies.len(), 1);
    assert!(gateway.replies[0].contains("no active operation"));
}

#[test]
fn cancelling_releases_the_staged_images() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(14);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("to be discarded".into()));
    let image = staged_image(work_directory.path(), "tmp_14_0.png", 64, 64);
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: image.clone() });
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Cancel));

    assert!(!image.exists());
    assert!(!flow.store().contains(id).unwrap());
    assert!(gateway
        .replies
        .last()
        .unwrap()
        .contains("cancelled"));
}

#[test]
fn restarting_a_flow_releases_the_previous_resources() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(15);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("first attempt".into()));
    let image = staged_image(work_directory.path(), "tmp_15_0.png", 64, 64);
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: image.clone() });

    // A second /newpdf overwrites the session and must not leak the staged image
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));

    assert!(!image.exists());
    let state = flow
        .store()
        .with_session(id, |session| (session.state, session.images.len()))
        .unwrap();
    assert_eq!(state, Some((SessionState::AwaitingText, 0)));
}

#[test]
fn a_repeated_done_while_the_build_is_marked_busy_is_ignored() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(16);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("guarded".into()));
    flow.store()
        .with_session(id, |session| session.busy = true)
        .unwrap();

    let replies_before = gateway.replies.len();
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));

    assert_eq!(gateway.replies.len(), replies_before);
    assert!(gateway.documents.is_empty());
    assert!(flow.store().contains(id).unwrap());
}

#[test]
fn a_delivery_failure_still_releases_every_resource() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway {
        fail_delivery: true,
        ..RecordingGateway::default()
    };
    let id = ConversationId(17);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("undeliverable".into()));
    let image = staged_image(work_directory.path(), "tmp_17_0.png", 64, 64);
    flow.handle_event(&mut gateway, id, UserEvent::Image { path: image.clone() });
    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));

    assert!(gateway
        .replies
        .iter()
        .any(|reply| reply.contains("Could not send")));
    assert!(!image.exists());
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
    assert!(!flow.store().contains(id).unwrap());
}

#[test]
fn an_unsupported_extension_terminates_the_conversion_session() {
    let work_directory = tempfile::tempdir().unwrap();
    let source_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: true });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(18);

    let document = source_directory.path().join("already.pdf");
    std::fs::write(&document, b"%PDF-1.5 already a pdf").unwrap();

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
    flow.handle_event(
        &mut gateway,
        id,
        UserEvent::Document {
            path: document,
            file_name: "already.pdf".into(),
        },
    );

    assert!(gateway
        .replies
        .last()
        .unwrap()
        .contains("formats are supported"));
    assert!(!flow.store().contains(id).unwrap());
    assert!(gateway.documents.is_empty());
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
}

#[test]
fn a_missing_converter_is_reported_and_leaves_nothing_behind() {
    let work_directory = tempfile::tempdir().unwrap();
    let source_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(19);

    let document = source_directory.path().join("report.docx");
    std::fs::write(&document, b"not really a word document").unwrap();

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
    flow.handle_event(
        &mut gateway,
        id,
        UserEvent::Document {
            path: document,
            file_name: "report.docx".into(),
        },
    );

    assert!(gateway
        .replies
        .iter()
        .any(|reply| reply.contains("Could not convert")));
    assert!(gateway.documents.is_empty());
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
    assert!(!flow.store().contains(id).unwrap());
}

#[test]
fn a_successful_conversion_delivers_the_renamed_output_and_cleans_up() {
    let work_directory = tempfile::tempdir().unwrap();
    let source_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: true });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(20);

    let document = source_directory.path().join("slides.pptx");
    std::fs::write(&document, b"not really a presentation").unwrap();

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
    flow.handle_event(
        &mut gateway,
        id,
        UserEvent::Document {
            path: document,
            file_name: "slides.pptx".into(),
        },
    );

    assert_eq!(gateway.documents.len(), 1);
    let (bytes, caption) = &gateway.documents[0];
    assert_eq!(bytes.as_slice(), b"%PDF-1.5 converter stub");
    assert!(caption.contains("slides.pptx"));
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
    assert!(!flow.store().contains(id).unwrap());
}

#[test]
fn text_documents_are_converted_internally() {
    let work_directory = tempfile::tempdir().unwrap();
    let source_directory = tempfile::tempdir().unwrap();
    // The failing stub proves the external converter is never consulted for .txt
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(21);

    let document = source_directory.path().join("notes.txt");
    std::fs::write(&document, "first line\nsecond line\n").unwrap();

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
    flow.handle_event(
        &mut gateway,
        id,
        UserEvent::Document {
            path: document,
            file_name: "notes.txt".into(),
        },
    );

    assert_eq!(gateway.documents.len(), 1);
    let pdf_document = lopdf::Document::load_mem(&gateway.documents[0].0).unwrap();
    assert_eq!(pdf_document.get_pages().len(), 1);
    assert_eq!(remaining_files(work_directory.path()), Vec::<String>::new());
}

#[test]
fn a_text_message_during_conversion_asks_for_a_file() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: true });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(22);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
    flow.handle_event(&mut gateway, id, UserEvent::Text("here it comes".into()));

    assert!(gateway.replies.last().unwrap().contains("send a file"));
    // The session survives, the document can still arrive
    assert!(flow.store().contains(id).unwrap());
}

#[test]
fn image_order_survives_into_the_session() {
    let work_directory = tempfile::tempdir().unwrap();
    let flow = flow_in(work_directory.path(), StubConverter { succeed: false });
    let mut gateway = RecordingGateway::default();
    let id = ConversationId(23);

    flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
    flow.handle_event(&mut gateway, id, UserEvent::Text("ordered".into()));
    for index in 0u32..4 {
        let image = staged_image(
            work_directory.path(),
            &format!("tmp_23_{}.png", index),
            32 + index,
            32,
        );
        flow.handle_event(&mut gateway, id, UserEvent::Image { path: image });
    }

    let widths = flow
        .store()
        .with_session(id, |session| {
            session
                .images
                .iter()
                .map(|image| image.width_px)
                .collect::<Vec<_>>()
        })
        .unwrap();
    similar_asserts::assert_eq!(widths, Some(vec![32, 33, 34, 35]));
}
