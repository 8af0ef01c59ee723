//! pdfpress is the engine of a conversational front-end which lets a remote user assemble
//! a PDF document out of a text block and a sequence of images, or convert an existing
//! office document to PDF, through a turn-based sequence of events. The chat transport
//! itself is out of scope: events arrive through the `MessagingGateway` trait and the
//! finished documents leave the same way, so that any delivery mechanism can be plugged
//! in front of the `ConversationFlow`.
//!
//! The pipeline of a build is: collect the inputs per conversation (`flow`, `session`),
//! lay them out into positioned draw operations (`layout`), and serialize those into an
//! actual PDF document (`pdf`, `font`). Office documents take the separate `convert`
//! path through a headless external converter.

/// The module where the page layout engine lives.
///
/// # Introduction
///
/// The entry point of this module is the `layout` function, a pure algorithm which takes
/// an optional text block, an ordered list of `ImageResource`s and the page geometry, and
/// produces a sequence of `Page`s holding positioned, scaled draw operations. Text lines
/// are horizontally centered and stacked top-down, images follow beneath the text in
/// arrival order, proportionally scaled and reflowed onto fresh pages when the vertical
/// space is exhausted. The algorithm performs no I/O, which keeps it deterministic and
/// directly testable.
pub mod layout;

/// This module contains the `ContextError` type which is the error type used throughout
/// this library, together with the `FlowError` taxonomy of the user-facing failures.
///
/// The `ContextError` type is always returned from a `Result` type, which means that the
/// end user can expect to obtain an explanation whenever a function returns an error. If
/// an error happened in a function which was called inside a function of this library,
/// then the user can expect to also obtain information about this propagated error.
pub mod error;

/// The module where the document font handling lives: loading TTF faces, extracting the
/// glyph metrics, and the fallback chain which selects the built-in base font when no
/// unicode-capable font file can be loaded from the host.
pub mod font;

/// The module where the PDF renderer is presented.
///
/// # Introduction
///
/// The main component of this module is the `Renderer`, which consumes the output of the
/// layout engine and serializes it into a PDF byte stream through the `lopdf` crate:
/// font embedding, text placement and image embedding are all handled here. The aspect
/// ratio of the images is already resolved by the layout engine, the renderer never
/// re-derives a scale.
pub mod pdf;

/// The per-conversation session state and the process-wide `SessionStore` mapping
/// conversation IDs to sessions, with an explicit lifecycle: inserted by the start
/// commands, removed on every terminal transition.
pub mod session;

/// The module where the conversation state machine is presented: it validates every
/// incoming gateway event against the current session state, mutates the session store,
/// and drives the layout engine, the renderer and the document converter. All failures
/// are folded into user-visible replies, nothing propagates out of the event handlers.
pub mod flow;

/// The document conversion path: the `DocumentConverter` trait with the headless
/// LibreOffice backend behind it, and the internal plain-text conversion.
pub mod convert;
