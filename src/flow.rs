use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::convert::{self, DocumentConverter, LibreOfficeConverter};
use crate::error::{ContextError, FlowError};
use crate::layout::{self, ImageResource, PageGeometry};
use crate::pdf::Renderer;
use crate::session::{ConversationId, Session, SessionState, SessionStore};

/// The commands understood by the conversation state machine. An optional `@botname`
/// suffix on the command token is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    NewPdf,
    Convert,
    Done,
    Cancel,
}

impl Command {
    /// Parses a command from the first token of a message, returning `None` for anything
    /// that is not a known command.
    pub fn parse(text: &str) -> Option<Command> {
        let token = text.trim().split_whitespace().next()?;
        let token = token.split('@').next()?;
        match token {
            "/start" => Some(Command::Start),
            "/newpdf" => Some(Command::NewPdf),
            "/convert" => Some(Command::Convert),
            "/done" => Some(Command::Done),
            "/cancel" => Some(Command::Cancel),
            _ => None,
        }
    }
}

/// One event delivered by the messaging gateway for a conversation. File-carrying events
/// reference files the gateway has already downloaded; the state machine takes ownership
/// of image files and deletes them once the owning flow terminates.
#[derive(Debug, Clone)]
pub enum UserEvent {
    Command(Command),
    /// A free-text message that is not a command.
    Text(String),
    /// An image attachment, downloaded by the gateway.
    Image { path: PathBuf },
    /// A document attachment, downloaded by the gateway, with its original file name.
    Document { path: PathBuf, file_name: String },
}

/// The outbound side of the messaging gateway. Replies are fire-and-forget, handing over
/// the finished document may fail and is reported as a delivery error.
pub trait MessagingGateway {
    fn reply(&mut self, id: ConversationId, text: &str);
    fn send_document(
        &mut self,
        id: ConversationId,
        document_path: &Path,
        caption: &str,
    ) -> Result<(), ContextError>;
}

/// The TTF paths probed for a unicode-capable document font when none is configured.
const DEFAULT_FONT_CANDIDATE_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Configuration of the conversation flows, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Directory the per-session temp files and results are written to.
    pub work_directory: PathBuf,
    /// Page dimensions every document is produced at.
    pub page: PageGeometry,
    /// TTF candidates for the embedded document font, probed in order.
    pub font_candidate_paths: Vec<PathBuf>,
    /// Explicit converter executable, skipping the discovery.
    pub converter_executable: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            work_directory: PathBuf::from("."),
            page: PageGeometry::default(),
            font_candidate_paths: DEFAULT_FONT_CANDIDATE_PATHS
                .iter()
                .map(PathBuf::from)
                .collect(),
            converter_executable: None,
        }
    }
}

const HELP_TEXT: &str = "Main commands:\n\
    /start - Show this menu\n\
    /newpdf - Create a new PDF from text and images\n\
    /convert - Convert a file (DOC, DOCX, PPTX, TXT) to PDF\n\
    /cancel - Cancel the current operation\n\
    \n\
    While creating a PDF:\n\
    /done - Finish adding images\n\
    \n\
    How to use:\n\
    1. Start with /newpdf\n\
    2. Send the text (it will be centered)\n\
    3. Send one or more images\n\
    4. Finish with /done\n\
    \n\
    Images are placed beneath the text in the order received";

const NEW_PDF_PROMPT: &str = "Send the text for the PDF (it will be centered on the page).\n\n\
    After the text you can add images (they are placed beneath it).\n\n\
    /cancel - cancel the creation";

const TEXT_RECEIVED: &str = "Text received, it will be centered in the PDF.\n\n\
    You can now send one or more images (they are added beneath the text in the order \
    received).\n\n\
    /done - finish and create the PDF\n\
    /cancel - cancel";

const CONVERT_PROMPT: &str = "Send the file to convert to PDF (DOC, DOCX, PPTX and TXT are \
    supported).\n\n\
    /cancel - cancel the operation";

const UNSUPPORTED_FORMAT: &str = "Only the following formats are supported:\n\
    - .doc/.docx\n\
    - .pptx\n\
    - .txt\n\n\
    Use /newpdf to build a PDF from text and images";

const BUILDING_PDF: &str = "Creating the PDF...";
const CONVERTING_FILE: &str = "Converting the file...";
const BUILD_CAPTION: &str =
    "Here is your PDF. The text is centered and the images are placed beneath it.";
const SEND_A_FILE: &str = "Please send a file to convert";
const CANCELLED: &str = "The current operation was cancelled";
const NOTHING_TO_CANCEL: &str = "There is no active operation to cancel";
const IMAGE_REJECTED: &str = "Could not add that image, please try another one";
const INTERNAL_ERROR: &str =
    "Something went wrong. Try again with /newpdf, or /cancel and start over.";

/// What the document handler decided while holding the session lock.
enum DocumentDecision {
    Ignore,
    Reject,
    Convert,
}

/// The per-conversation finite-state controller. It ingests gateway events, drives the
/// session store, and invokes the layout engine, the renderer and the document converter.
/// Every handler is wrapped so that no fault propagates out: failures end as a logged,
/// user-visible reply, and one malformed session never affects the others.
pub struct ConversationFlow<C: DocumentConverter = LibreOfficeConverter> {
    config: FlowConfig,
    store: SessionStore,
    renderer: Renderer,
    converter: C,
}

impl ConversationFlow<LibreOfficeConverter> {
    pub fn new(config: FlowConfig) -> ConversationFlow<LibreOfficeConverter> {
        let converter = LibreOfficeConverter::new(config.converter_executable.clone());
        ConversationFlow::with_converter(config, converter)
    }
}

impl<C: DocumentConverter> ConversationFlow<C> {
    /// Constructs the flow around an explicit converter backend.
    pub fn with_converter(config: FlowConfig, converter: C) -> ConversationFlow<C> {
        let renderer = Renderer::new(&config.font_candidate_paths);
        ConversationFlow {
            config,
            store: SessionStore::new(),
            renderer,
            converter,
        }
    }

    /// The session store, exposed for inspection.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The renderer the build pipeline uses.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Handles one gateway event for the given conversation. Never fails: internal faults
    /// are logged and turned into a reply.
    pub fn handle_event(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        event: UserEvent,
    ) {
        if let Err(error) = self.dispatch(gateway, id, event) {
            log::error!(
                "Internal error while handling an event for the conversation {}: {}",
                id,
                error
            );
            gateway.reply(id, INTERNAL_ERROR);
        }
    }

    fn dispatch(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        event: UserEvent,
    ) -> Result<(), ContextError> {
        match event {
            UserEvent::Command(Command::Start) => {
                gateway.reply(id, HELP_TEXT);
                Ok(())
            }
            UserEvent::Command(Command::NewPdf) => {
                self.begin_session(id, SessionState::AwaitingText)?;
                gateway.reply(id, NEW_PDF_PROMPT);
                Ok(())
            }
            UserEvent::Command(Command::Convert) => {
                self.begin_session(id, SessionState::AwaitingDocument)?;
                gateway.reply(id, CONVERT_PROMPT);
                Ok(())
            }
            UserEvent::Command(Command::Cancel) => self.handle_cancel(gateway, id),
            UserEvent::Command(Command::Done) => self.handle_done(gateway, id),
            UserEvent::Text(text) => self.handle_text(gateway, id, text),
            UserEvent::Image { path } => self.handle_image(gateway, id, &path),
            UserEvent::Document { path, file_name } => {
                self.handle_document(gateway, id, &path, &file_name)
            }
        }
    }

    /// Inserts a fresh session, explicitly releasing the resources of the one it replaces
    /// so that an interrupted flow does not leak its temp files.
    fn begin_session(&self, id: ConversationId, state: SessionState) -> Result<(), ContextError> {
        if let Some(replaced_session) = self.store.begin(id, state)? {
            log::info!(
                "The conversation {} restarted, releasing the interrupted session",
                id
            );
            self.release_session(replaced_session);
        }
        Ok(())
    }

    fn handle_cancel(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
    ) -> Result<(), ContextError> {
        match self.store.remove(id)? {
            Some(session) => {
                self.release_session(session);
                gateway.reply(id, CANCELLED);
            }
            // Cancelling without an active session is a plain informational reply
            None => gateway.reply(id, NOTHING_TO_CANCEL),
        }
        Ok(())
    }

    fn handle_text(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        text: String,
    ) -> Result<(), ContextError> {
        let reply = self.store.with_session(id, |session| match session.state {
            SessionState::AwaitingText => {
                session.text = Some(text);
                session.state = SessionState::AwaitingImages;
                Some(TEXT_RECEIVED)
            }
            SessionState::AwaitingDocument => Some(SEND_A_FILE),
            // Text in any other state is silently ignored
            _ => None,
        })?;
        if let Some(reply) = reply.flatten() {
            gateway.reply(id, reply);
        }
        Ok(())
    }

    fn handle_image(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        path: &Path,
    ) -> Result<(), ContextError> {
        let reply = self.store.with_session(id, |session| {
            if session.state != SessionState::AwaitingImages {
                return None;
            }
            match ImageResource::from_path(path) {
                Ok(resource) => {
                    session.images.push(resource);
                    Some(format!(
                        "Image {} added. Send another one or /done to create the PDF",
                        session.images.len()
                    ))
                }
                Err(error) => {
                    log::warn!(
                        "Rejecting an image for the conversation {}: {}",
                        session.id,
                        error
                    );
                    Some(IMAGE_REJECTED.to_string())
                }
            }
        })?;
        if let Some(reply) = reply.flatten() {
            gateway.reply(id, &reply);
        }
        Ok(())
    }

    fn handle_done(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
    ) -> Result<(), ContextError> {
        // The busy guard and the state check happen under the store lock, repeat triggers
        // while a build is in flight fall through to the silent-ignore branch
        let build_inputs = self.store.with_session(id, |session| {
            if session.state != SessionState::AwaitingImages || session.busy {
                return None;
            }
            session.busy = true;
            session.state = SessionState::Building;
            Some((session.text.clone(), session.images.clone()))
        })?;

        let Some(Some((text, images))) = build_inputs else {
            return Ok(());
        };
        gateway.reply(id, BUILDING_PDF);

        let result_path = self.result_path(id);
        let build_result = self.run_build(gateway, id, text.as_deref(), &images, &result_path);
        if let Err(error) = build_result {
            log::error!("The build for the conversation {} failed: {}", id, error);
            gateway.reply(id, &error.user_message());
        }

        // The session and all its artifacts are released on success and failure alike
        remove_file_if_present(&result_path);
        if let Some(session) = self.store.remove(id)? {
            self.release_session(session);
        }
        Ok(())
    }

    fn run_build(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        text: Option<&str>,
        images: &[ImageResource],
        result_path: &Path,
    ) -> Result<(), FlowError> {
        let pages = layout::layout(text, images, &self.config.page, self.renderer.font());
        self.renderer
            .render_to_file(&pages, images, &self.config.page, result_path)
            .map_err(FlowError::Render)?;
        log::info!(
            "Built a {} page document for the conversation {}",
            pages.len(),
            id
        );
        gateway
            .send_document(id, result_path, BUILD_CAPTION)
            .map_err(FlowError::Delivery)?;
        Ok(())
    }

    fn handle_document(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        path: &Path,
        file_name: &str,
    ) -> Result<(), ContextError> {
        let extension = Path::new(file_name)
            .extension()
            .map(|extension| extension.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let supported = convert::is_supported_extension(&extension);

        let decision = self
            .store
            .with_session(id, |session| {
                if session.state != SessionState::AwaitingDocument || session.busy {
                    return DocumentDecision::Ignore;
                }
                if !supported {
                    return DocumentDecision::Reject;
                }
                session.busy = true;
                session.state = SessionState::Converting;
                DocumentDecision::Convert
            })?
            .unwrap_or(DocumentDecision::Ignore);

        match decision {
            DocumentDecision::Ignore => Ok(()),
            DocumentDecision::Reject => {
                // An unsupported extension terminates the session, unlike the other
                // mismatched inputs which leave it untouched
                if let Some(session) = self.store.remove(id)? {
                    self.release_session(session);
                }
                gateway.reply(id, UNSUPPORTED_FORMAT);
                Ok(())
            }
            DocumentDecision::Convert => {
                gateway.reply(id, CONVERTING_FILE);

                let input_path = self
                    .config
                    .work_directory
                    .join(format!("convert_input_{}.{}", id, extension));
                let output_path = self.converted_path(id);
                let conversion_result = self.run_conversion(
                    gateway,
                    id,
                    path,
                    file_name,
                    &extension,
                    &input_path,
                    &output_path,
                );
                if let Err(error) = conversion_result {
                    log::error!(
                        "The conversion for the conversation {} failed: {}",
                        id,
                        error
                    );
                    gateway.reply(id, &error.user_message());
                }

                remove_file_if_present(&input_path);
                remove_file_if_present(&output_path);
                if let Some(session) = self.store.remove(id)? {
                    self.release_session(session);
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_conversion(
        &self,
        gateway: &mut dyn MessagingGateway,
        id: ConversationId,
        document_path: &Path,
        file_name: &str,
        extension: &str,
        input_path: &Path,
        output_path: &Path,
    ) -> Result<(), FlowError> {
        std::fs::copy(document_path, input_path)
            .map_err(|error| {
                FlowError::Conversion(ContextError::with_error(
                    format!("Failed to stage the file {:?} for conversion", document_path),
                    &error,
                ))
            })?;

        if extension.eq_ignore_ascii_case("txt") {
            convert::plain_text_to_pdf(input_path, output_path, &self.renderer, &self.config.page)
                .map_err(FlowError::Conversion)?;
        } else {
            let produced_path = self
                .converter
                .convert(input_path, &self.config.work_directory)
                .map_err(FlowError::Conversion)?;
            // The converter names the output after the input stem, align it with the
            // per-conversation result name
            if produced_path != output_path {
                std::fs::rename(&produced_path, output_path).map_err(|error| {
                    FlowError::Conversion(ContextError::with_error(
                        format!("Failed to move the converted file {:?}", produced_path),
                        &error,
                    ))
                })?;
            }
        }

        gateway
            .send_document(id, output_path, &format!("Converted to PDF: {}", file_name))
            .map_err(FlowError::Delivery)?;
        Ok(())
    }

    /// Deletes every temp artifact a session may have produced. Failures are logged and
    /// never escalated.
    fn release_session(&self, session: Session) {
        for image in &session.images {
            remove_file_if_present(&image.path);
        }
        remove_file_if_present(&self.result_path(session.id));
        remove_file_if_present(&self.converted_path(session.id));
        for extension in convert::SUPPORTED_EXTENSIONS {
            remove_file_if_present(
                &self
                    .config
                    .work_directory
                    .join(format!("convert_input_{}.{}", session.id, extension)),
            );
        }
    }

    fn result_path(&self, id: ConversationId) -> PathBuf {
        self.config
            .work_directory
            .join(format!("result_{}.pdf", id))
    }

    fn converted_path(&self, id: ConversationId) -> PathBuf {
        self.config
            .work_directory
            .join(format!("converted_{}.pdf", id))
    }
}

/// Removes a temp file, logging a failure instead of propagating it.
fn remove_file_if_present(path: &Path) {
    if path.exists() {
        if let Err(error) = std::fs::remove_file(path) {
            log::warn!("Failed to remove the temp file {:?}: {}", path, error);
        }
    }
}
