#![warn(clippy::unwrap_used)]

use clap::Parser;
use std::path::{Path, PathBuf};

use pdfpress::error::ContextError;
use pdfpress::flow::{Command, ConversationFlow, FlowConfig, MessagingGateway, UserEvent};
use pdfpress::session::ConversationId;

/// A local stand-in for the messaging gateway: the command line arguments are turned into
/// the event sequence a chat conversation would deliver, replies are printed to standard
/// output, and the finished document is copied to the requested path.
#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct CliArguments {
    /// The text block of the document, centered on the first page.
    #[arg(short = 't', long = "text", value_name = "text")]
    text: Option<String>,
    /// An image placed beneath the text, repeatable, kept in the given order.
    #[arg(short = 'i', long = "image", value_name = "image_file")]
    images: Vec<PathBuf>,
    /// Convert this office or text document instead of building from text and images.
    #[arg(short = 'c', long = "convert", value_name = "document_file", conflicts_with_all = ["text", "images"])]
    convert: Option<PathBuf>,
    /// Where the finished PDF is written.
    #[arg(short = 'o', long = "output", value_name = "output_file")]
    output_path: PathBuf,
    /// Optional JSON flow configuration file.
    #[arg(long = "config", value_name = "config_file")]
    config_path: Option<PathBuf>,
}

struct ConsoleGateway {
    output_path: PathBuf,
    delivered: bool,
}

impl MessagingGateway for ConsoleGateway {
    fn reply(&mut self, id: ConversationId, text: &str) {
        println!("[{}] {}", id, text);
    }

    fn send_document(
        &mut self,
        _id: ConversationId,
        document_path: &Path,
        caption: &str,
    ) -> Result<(), ContextError> {
        std::fs::copy(document_path, &self.output_path).map_err(|error| {
            ContextError::with_error(
                format!("Failed to copy the document to {:?}", self.output_path),
                &error,
            )
        })?;
        println!("[document] {} -> {:?}", caption, self.output_path);
        self.delivered = true;
        Ok(())
    }
}

fn main() {
    if let Err(error) = fallible_main() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn fallible_main() -> Result<(), ContextError> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let arguments = CliArguments::parse();
    log::debug!("{:?}", arguments);

    let config = match &arguments.config_path {
        Some(config_path) => {
            let config_content = std::fs::read_to_string(config_path).map_err(|error| {
                ContextError::with_error(
                    format!("Unable to read the configuration {:?}", config_path),
                    &error,
                )
            })?;
            serde_json::from_str::<FlowConfig>(&config_content).map_err(|error| {
                ContextError::with_error(
                    format!("Unable to parse the configuration {:?}", config_path),
                    &error,
                )
            })?
        }
        None => FlowConfig {
            work_directory: std::env::temp_dir(),
            ..FlowConfig::default()
        },
    };
    let work_directory = config.work_directory.clone();

    let flow = ConversationFlow::new(config);
    let mut gateway = ConsoleGateway {
        output_path: arguments.output_path.clone(),
        delivered: false,
    };
    let id = ConversationId(std::process::id() as i64);

    if let Some(document_path) = &arguments.convert {
        let file_name = document_path
            .file_name()
            .ok_or(ContextError::with_context(format!(
                "The document path {:?} has no file name",
                document_path
            )))?
            .to_string_lossy()
            .into_owned();
        flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Convert));
        flow.handle_event(
            &mut gateway,
            id,
            UserEvent::Document {
                path: document_path.clone(),
                file_name,
            },
        );
    } else {
        flow.handle_event(&mut gateway, id, UserEvent::Command(Command::NewPdf));
        match &arguments.text {
            Some(text) => {
                flow.handle_event(&mut gateway, id, UserEvent::Text(text.clone()));
            }
            None => {
                // An empty text block still moves the session forward so that the images
                // can be collected
                flow.handle_event(&mut gateway, id, UserEvent::Text(String::new()));
            }
        }
        // Stage the images the way the gateway would: download them into the work
        // directory, the flow takes ownership of the staged copies
        for (index, image_path) in arguments.images.iter().enumerate() {
            let staged_path = stage_image(&work_directory, id, index, image_path)?;
            flow.handle_event(&mut gateway, id, UserEvent::Image { path: staged_path });
        }
        flow.handle_event(&mut gateway, id, UserEvent::Command(Command::Done));
    }

    if !gateway.delivered {
        return Err(ContextError::with_context(
            "No document was produced, see the replies above",
        ));
    }
    log::info!("Saved the output file to the path: {:?}", arguments.output_path);
    Ok(())
}

/// Copies one source image into the work directory under the per-session temp name the
/// flow expects to own and later delete.
fn stage_image(
    work_directory: &Path,
    id: ConversationId,
    index: usize,
    image_path: &Path,
) -> Result<PathBuf, ContextError> {
    let extension = image_path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    let staged_path = work_directory.join(format!("tmp_{}_{}{}", id, index, extension));
    std::fs::copy(image_path, &staged_path).map_err(|error| {
        ContextError::with_error(
            format!("Failed to stage the image {:?}", image_path),
            &error,
        )
    })?;

    Ok(staged_path)
}
