use lopdf::{Object, StringFormat};
use rand::{distributions::Alphanumeric, Rng as _};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::BufWriter,
    mem,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use unicode_normalization::UnicodeNormalization as _;

use crate::error::ContextError;
use crate::font::{DocumentFont, EmbeddedFont, GlyphMetrics, BUILTIN_BASE_FONT};
use crate::layout::{DrawOp, ImageResource, Page, PageGeometry};

/// The low-level image representation for a PDF document: decoded (or passed-through)
/// sample data together with the parameters the image dictionary needs.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    /// Width of the image in pixels (original width, not the scaled placement width).
    pub width_px: u32,
    /// Height of the image in pixels (original height, not the scaled placement height).
    pub height_px: u32,
    /// Bits per color component, always 8 for the formats accepted here.
    pub bits_per_component: u16,
    /// The PDF color space name the sample data is expressed in.
    pub color_space: &'static str,
    /// The stream filter the sample data is already encoded with, if any.
    pub filter: Option<&'static str>,
    /// The actual sample data.
    pub data: Vec<u8>,
}

impl ImageXObject {
    /// Reads the image behind the resource. JPEG files keep their original bytes and are
    /// embedded behind a `DCTDecode` filter, every other accepted format is decoded to
    /// plain 8-bit RGB samples and left to the document-wide stream compression.
    pub fn from_resource(resource: &ImageResource) -> Result<ImageXObject, ContextError> {
        let reader = image::ImageReader::open(&resource.path)
            .map_err(|error| {
                ContextError::with_error(
                    format!("Failed to open the image {:?}", resource.path),
                    &error,
                )
            })?
            .with_guessed_format()
            .map_err(|error| {
                ContextError::with_error(
                    format!("Failed to probe the image format of {:?}", resource.path),
                    &error,
                )
            })?;
        let format = reader.format();
        let decoded = reader.decode().map_err(|error| {
            ContextError::with_error(
                format!("Failed to decode the image {:?}", resource.path),
                &error,
            )
        })?;

        if format == Some(image::ImageFormat::Jpeg) {
            // The JPEG scan is embedded untouched, only the color space is taken from
            // the decoded representation
            let color_space = match decoded.color().channel_count() {
                1 | 2 => "DeviceGray",
                _ => "DeviceRGB",
            };
            let data = std::fs::read(&resource.path).map_err(|error| {
                ContextError::with_error(
                    format!("Failed to read the image bytes of {:?}", resource.path),
                    &error,
                )
            })?;

            return Ok(ImageXObject {
                width_px: decoded.width(),
                height_px: decoded.height(),
                bits_per_component: 8,
                color_space,
                filter: Some("DCTDecode"),
                data,
            });
        }

        let rgb_image = decoded.to_rgb8();
        Ok(ImageXObject {
            width_px: rgb_image.width(),
            height_px: rgb_image.height(),
            bits_per_component: 8,
            color_space: "DeviceRGB",
            filter: None,
            data: rgb_image.into_raw(),
        })
    }
}

impl From<ImageXObject> for lopdf::Stream {
    fn from(value: ImageXObject) -> lopdf::Stream {
        use lopdf::Object::*;

        let mut dictionary = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".into())),
            ("Subtype", Name("Image".into())),
            ("Width", Integer(value.width_px as i64)),
            ("Height", Integer(value.height_px as i64)),
            ("ColorSpace", Name(value.color_space.into())),
            ("BitsPerComponent", Integer(value.bits_per_component as i64)),
        ]);
        // Already-encoded data keeps its filter and must not be compressed a second time,
        // raw samples are left to the document-wide compression pass
        let allows_compression = value.filter.is_none();
        if let Some(filter) = value.filter {
            dictionary.set("Filter", Name(filter.into()));
        }

        lopdf::Stream::new(dictionary, value.data).with_compression(allows_compression)
    }
}

/// The PDF renderer: owns the resolved document font and serializes layout pages into a
/// finished PDF byte stream. The aspect ratio of the images is already resolved by the
/// layout engine, the renderer places every draw operation at its given coordinates.
pub struct Renderer {
    font: DocumentFont,
}

impl Renderer {
    /// Resolves the document font from the candidate TTF paths (see
    /// [`DocumentFont::resolve`]) and constructs the renderer.
    pub fn new(font_candidate_paths: &[PathBuf]) -> Renderer {
        Renderer {
            font: DocumentFont::resolve(font_candidate_paths),
        }
    }

    /// The font the renderer measures and draws text with.
    pub fn font(&self) -> &DocumentFont {
        &self.font
    }

    /// Serializes the layout pages into a complete PDF document and returns its bytes.
    /// `images` is the same list the layout was computed from, the draw operations
    /// reference into it by index.
    pub fn render(
        &self,
        pages: &[Page],
        images: &[ImageResource],
        geometry: &PageGeometry,
    ) -> Result<Vec<u8>, ContextError> {
        use lopdf::Object::*;

        let mut inner_document = lopdf::Document::with_version("1.5");

        // Register the document font under the fixed identifier F0
        let font_reference = match &self.font {
            DocumentFont::Embedded(font) => {
                let font_object_id = inner_document.new_object_id();
                let font_dictionary = insert_embedded_font(font, &mut inner_document);
                inner_document
                    .objects
                    .insert(font_object_id, Dictionary(font_dictionary));
                font_object_id
            }
            DocumentFont::Builtin => inner_document.add_object(Dictionary(
                lopdf::Dictionary::from_iter(vec![
                    ("Type", Name("Font".into())),
                    ("Subtype", Name("Type1".into())),
                    ("BaseFont", Name(BUILTIN_BASE_FONT.into())),
                    ("Encoding", Name("WinAnsiEncoding".into())),
                ]),
            )),
        };
        let fonts_dictionary_id = inner_document.add_object(Dictionary(
            lopdf::Dictionary::from_iter(vec![("F0", Reference(font_reference))]),
        ));

        // Embed each image referenced by any page exactly once
        let referenced_indices: BTreeSet<usize> = pages
            .iter()
            .flat_map(|page| &page.operations)
            .filter_map(|operation| match operation {
                DrawOp::Image { index, .. } => Some(*index),
                DrawOp::TextLine { .. } => None,
            })
            .collect();
        let mut image_references = BTreeMap::<usize, lopdf::ObjectId>::new();
        for index in referenced_indices {
            let resource = images.get(index).ok_or(ContextError::with_context(format!(
                "The layout references the image {} but only {} were submitted",
                index,
                images.len()
            )))?;
            let xobject = ImageXObject::from_resource(resource)?;
            let stream: lopdf::Stream = xobject.into();
            image_references.insert(index, inner_document.add_object(stream));
        }

        let pages_id = inner_document.new_object_id();
        let mut page_ids = Vec::<Object>::new();

        for page in pages {
            let mut operations = Vec::<lopdf::content::Operation>::new();
            let mut page_xobjects = lopdf::Dictionary::new();

            for draw_operation in &page.operations {
                match draw_operation {
                    DrawOp::TextLine {
                        text,
                        x,
                        y,
                        font_size,
                    } => {
                        operations.extend(self.text_operations(text, *x, *y, *font_size));
                    }
                    DrawOp::Image {
                        index,
                        x,
                        y,
                        width,
                        height,
                    } => {
                        let object_id =
                            image_references
                                .get(index)
                                .ok_or(ContextError::with_context(format!(
                                    "The image {} was referenced but never embedded",
                                    index
                                )))?;
                        let xobject_name = format!("X{}", index);
                        page_xobjects.set(xobject_name.clone(), Reference(*object_id));
                        operations.extend(image_operations(&xobject_name, *x, *y, *width, *height));
                    }
                }
            }

            let content = lopdf::content::Content { operations };
            let content_bytes = content.encode().map_err(|error| {
                ContextError::with_error("Failed to encode the page content", &error)
            })?;
            let content_id = inner_document.add_object(
                lopdf::Stream::new(lopdf::Dictionary::new(), content_bytes)
                    .with_compression(false),
            );

            let mut resources = lopdf::Dictionary::from_iter(vec![(
                "Font",
                Object::Reference(fonts_dictionary_id),
            )]);
            if !page_xobjects.is_empty() {
                resources.set("XObject", Dictionary(page_xobjects));
            }
            let resources_id = inner_document.add_object(Dictionary(resources));

            let media_box: Object = vec![
                0.into(),
                0.into(),
                geometry.width.into(),
                geometry.height.into(),
            ]
            .into();
            let page_dictionary = lopdf::Dictionary::from_iter(vec![
                ("Type", "Page".into()),
                ("Rotate", Integer(0)),
                ("MediaBox", media_box.clone()),
                ("TrimBox", media_box.clone()),
                ("CropBox", media_box),
                ("Parent", Reference(pages_id)),
                ("Resources", Reference(resources_id)),
                ("Contents", Reference(content_id)),
            ]);
            page_ids.push(Reference(inner_document.add_object(page_dictionary)));
        }

        let pages_dictionary = lopdf::Dictionary::from_iter(vec![
            ("Type", "Pages".into()),
            ("Count", Integer(pages.len() as i64)),
            ("Kids", Array(page_ids)),
        ]);
        inner_document
            .objects
            .insert(pages_id, Dictionary(pages_dictionary));

        let catalog_id = inner_document.add_object(Dictionary(lopdf::Dictionary::from_iter(
            vec![
                ("Type", "Catalog".into()),
                ("PageLayout", "OneColumn".into()),
                ("PageMode", "UseNone".into()),
                ("Pages", Reference(pages_id)),
            ],
        )));

        let timestamp = to_pdf_timestamp_format(&OffsetDateTime::now_utc());
        let document_info_id = inner_document.add_object(Dictionary(
            lopdf::Dictionary::from_iter(vec![
                ("Trapped", "False".into()),
                (
                    "CreationDate",
                    String(timestamp.clone().into_bytes(), StringFormat::Literal),
                ),
                (
                    "ModDate",
                    String(timestamp.into_bytes(), StringFormat::Literal),
                ),
                (
                    "Producer",
                    String("pdfpress".to_string().into_bytes(), StringFormat::Literal),
                ),
            ]),
        ));

        inner_document.trailer.set("Root", Reference(catalog_id));
        inner_document.trailer.set("Info", Reference(document_info_id));
        inner_document.trailer.set(
            "ID",
            Array(vec![
                String(random_identifier().into_bytes(), StringFormat::Literal),
                String(random_identifier().into_bytes(), StringFormat::Literal),
            ]),
        );

        // Compresses the raw image sample streams among others
        inner_document.compress();

        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error("Error while saving the PDF document to bytes", &error)
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    /// Renders the pages and writes the finished document to the given path.
    pub fn render_to_file(
        &self,
        pages: &[Page],
        images: &[ImageResource],
        geometry: &PageGeometry,
        output_path: &Path,
    ) -> Result<(), ContextError> {
        let pdf_document_bytes = self.render(pages, images, geometry)?;
        std::fs::write(output_path, pdf_document_bytes).map_err(|error| {
            ContextError::with_error(
                format!("Failed to write the PDF document to {:?}", output_path),
                &error,
            )
        })
    }

    /// The operations drawing one line of text at the given baseline position. For the
    /// embedded font the text is emitted as hexadecimal glyph IDs, for the built-in base
    /// font as WinAnsi bytes with unrepresentable characters replaced.
    fn text_operations(
        &self,
        text: &str,
        x: f32,
        y: f32,
        font_size: f32,
    ) -> Vec<lopdf::content::Operation> {
        use lopdf::content::Operation;

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F0".into(), font_size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new(
                "rg",
                vec![0.0, 0.0, 0.0].into_iter().map(Object::Real).collect(),
            ),
        ];

        match &self.font {
            DocumentFont::Embedded(font) => {
                let mut glyph_id_list = Vec::<u16>::new();
                // Normalize the text in the NFC form before processing
                for character in text.nfc() {
                    if let Some(glyph_id) = font.ttf_face.glyph_id(character) {
                        glyph_id_list.push(glyph_id);
                    } else {
                        log::warn!("Unable to find the character {:?} in the font", character);
                    }
                }
                // Convert each glyph ID into the byte format accepted by the PDF specification
                let glyph_id_bytes = glyph_id_list
                    .iter()
                    .flat_map(|glyph_id| vec![(glyph_id >> 8) as u8, (glyph_id & 255) as u8])
                    .collect::<Vec<u8>>();
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(glyph_id_bytes, StringFormat::Hexadecimal)],
                ));
            }
            DocumentFont::Builtin => {
                let encoded_bytes = text
                    .nfc()
                    .map(|character| {
                        let codepoint = character as u32;
                        if codepoint < 256 {
                            codepoint as u8
                        } else {
                            b'?'
                        }
                    })
                    .collect::<Vec<u8>>();
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(encoded_bytes, StringFormat::Literal)],
                ));
            }
        }

        operations.push(Operation::new("ET", vec![]));
        operations
    }
}

/// The operations placing one image: an isolated graphics state block which maps the unit
/// square onto the scaled placement rectangle and paints the named `XObject` into it.
fn image_operations(
    xobject_name: &str,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
) -> Vec<lopdf::content::Operation> {
    use lopdf::content::Operation;

    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                width.into(),
                0.into(),
                0.into(),
                height.into(),
                x.into(),
                y.into(),
            ],
        ),
        Operation::new("Do", vec![xobject_name.into()]),
        Operation::new("Q", vec![]),
    ]
}

/// Takes a well-formed font and inserts it into the PDF document, returning the associated
/// PDF dictionary. The font is embedded as a `Type0` composite font with a `CIDFontType2`
/// descendant carrying the glyph widths, so that any glyph the face holds stays addressable.
fn insert_embedded_font(
    font: &EmbeddedFont,
    inner_document: &mut lopdf::Document,
) -> lopdf::Dictionary {
    use lopdf::Object::*;

    let face_metrics = font.ttf_face.font_metrics();

    // The PDF specification requests the length in bytes of the font data to be declared
    // up front because the format mixes text and byte data
    let font_stream = lopdf::Stream::new(
        lopdf::Dictionary::from_iter(vec![("Length1", Integer(font.bytes.len() as i64))]),
        font.bytes.clone(),
    )
    .with_compression(false);

    let mut font_vector: Vec<(std::string::String, lopdf::Object)> = vec![
        ("Type".into(), Name("Font".into())),
        ("Subtype".into(), Name("Type0".into())),
        (
            "BaseFont".into(),
            Name(font.face_identifier.clone().into_bytes()),
        ),
        // `Identity-H` selects horizontal writing with the glyph IDs used directly
        ("Encoding".into(), Name("Identity-H".into())),
    ];

    let mut font_descriptor_vector: Vec<(std::string::String, lopdf::Object)> = vec![
        ("Type".into(), Name("FontDescriptor".into())),
        (
            "FontName".into(),
            Name(font.face_identifier.clone().into_bytes()),
        ),
        ("Ascent".into(), Integer(i64::from(face_metrics.ascent))),
        ("Descent".into(), Integer(i64::from(face_metrics.descent))),
        ("CapHeight".into(), Integer(i64::from(face_metrics.ascent))),
        ("ItalicAngle".into(), Integer(0)),
        // The font uses the Adobe standard Latin character set or a subset of it
        ("Flags".into(), Integer(32)),
        // 80 is an approximately appropriate default for `StemV`
        ("StemV".into(), Integer(80)),
    ];

    // Maximum height of a single character and total width of all characters, used for
    // the font bounding box
    let mut maximum_character_height = 0u32;
    let mut total_width = 0u32;

    // Association between glyph IDs and pairs of unicode codepoints and glyph widths
    let mut gid_to_glyph_properties_map = BTreeMap::<u16, (u32, u32)>::new();
    for (glyph_id, character) in font.ttf_face.glyph_ids() {
        if let Some(glyph_metrics) = font.ttf_face.glyph_metrics(glyph_id) {
            if glyph_metrics.height > maximum_character_height {
                maximum_character_height = glyph_metrics.height;
            }
            total_width += glyph_metrics.width;
            gid_to_glyph_properties_map.insert(glyph_id, (character as u32, glyph_metrics.width));
        }
    }

    // Glyph IDs in a `beginbfchar` block have to share their first byte and a block may
    // hold at most 100 entries, so the sorted glyph IDs are cut into buckets accordingly
    let mut all_gid_to_character_blocks = Vec::new();
    let mut current_block = Vec::new();
    let mut current_first_byte: u16 = 0;
    for (glyph_id, (codepoint, _width)) in gid_to_glyph_properties_map.iter() {
        if (*glyph_id >> 8) != current_first_byte || current_block.len() >= 100 {
            all_gid_to_character_blocks.push(mem::take(&mut current_block));
            current_first_byte = *glyph_id >> 8;
        }
        current_block.push((*glyph_id as u32, *codepoint));
    }
    all_gid_to_character_blocks.push(current_block);

    let cid_to_unicode_map =
        generate_cid_to_unicode_map(&font.face_identifier, all_gid_to_character_blocks);
    let cid_to_unicode_map_stream = lopdf::Stream::new(
        lopdf::Dictionary::new(),
        cid_to_unicode_map.into_bytes(),
    );
    let cid_to_unicode_map_stream_id = inner_document.add_object(cid_to_unicode_map_stream);

    // Encode the glyph widths the way page 439 of the PDF 1.7 reference expects: runs of
    // consecutive glyph IDs become `start [w0 w1 ...]` entries, scaled into the 1000 unit
    // em square
    let percentage_font_scaling = 1000.0 / (face_metrics.units_per_em as f32);
    let mut width_objects = Vec::<Object>::new();
    let mut run_start: u16 = 0;
    let mut run_widths = Vec::<Object>::new();
    for glyph_id in 0..font.ttf_face.glyph_count() {
        match font.ttf_face.glyph_metrics(glyph_id) {
            Some(GlyphMetrics { width, .. }) => {
                if run_widths.is_empty() {
                    run_start = glyph_id;
                }
                run_widths.push(Integer((width as f32 * percentage_font_scaling) as i64));
            }
            None => {
                log::warn!(
                    "Glyph ID {} of the font {:?} has no width, skipping it when adding it to the document",
                    glyph_id,
                    font.face_identifier
                );
                if !run_widths.is_empty() {
                    width_objects.push(Integer(run_start as i64));
                    width_objects.push(Array(mem::take(&mut run_widths)));
                }
            }
        }
    }
    if !run_widths.is_empty() {
        width_objects.push(Integer(run_start as i64));
        width_objects.push(Array(run_widths));
    }

    let mut font_descriptors = lopdf::Dictionary::from_iter(vec![
        ("Type", Name("Font".into())),
        ("Subtype", Name("CIDFontType2".into())),
        ("BaseFont", Name(font.face_identifier.clone().into())),
        (
            "CIDSystemInfo",
            Dictionary(lopdf::Dictionary::from_iter(vec![
                ("Registry", String("Adobe".into(), StringFormat::Literal)),
                ("Ordering", String("Identity".into(), StringFormat::Literal)),
                ("Supplement", Integer(0)),
            ])),
        ),
        ("W", Array(width_objects)),
        ("DW", Integer(1000)),
    ]);

    font_descriptor_vector.push((
        "FontFile2".into(),
        Reference(inner_document.add_object(font_stream)),
    ));
    // Although technically not needed, Adobe Reader wants the bounding box present
    font_descriptor_vector.push((
        "FontBBox".into(),
        Array(vec![
            Integer(0),
            Integer(maximum_character_height as i64),
            Integer(total_width as i64),
            Integer(maximum_character_height as i64),
        ]),
    ));

    let font_descriptor_vector_id =
        inner_document.add_object(lopdf::Dictionary::from_iter(font_descriptor_vector));
    font_descriptors.set("FontDescriptor", Reference(font_descriptor_vector_id));

    font_vector.push((
        "DescendantFonts".into(),
        Array(vec![Dictionary(font_descriptors)]),
    ));
    font_vector.push(("ToUnicode".into(), Reference(cid_to_unicode_map_stream_id)));

    lopdf::Dictionary::from_iter(font_vector)
}

type CmapBlock = Vec<(u32, u32)>;

/// Generates the `ToUnicode` character map from the given blocks of glyph ID to codepoint
/// pairs, following the CMap structure the PDF specification prescribes.
fn generate_cid_to_unicode_map(face_name: &str, all_cmap_blocks: Vec<CmapBlock>) -> String {
    let mut cid_to_unicode_map = format!(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo <<\n\
         /Registry (Adobe)\n\
         /Ordering (UCS)\n\
         /Supplement 0\n\
         >> def\n\
         /CMapName /{} def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <ffff>\n\
         endcodespacerange\n",
        face_name
    );

    for cmap_block in all_cmap_blocks
        .into_iter()
        .filter(|block| !block.is_empty())
    {
        cid_to_unicode_map.push_str(format!("{} beginbfchar\r\n", cmap_block.len()).as_str());
        for (glyph_id, unicode) in cmap_block {
            cid_to_unicode_map.push_str(format!("<{glyph_id:04x}> <{unicode:04x}>\n").as_str());
        }
        cid_to_unicode_map.push_str("endbfchar\r\n");
    }

    cid_to_unicode_map.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );

    cid_to_unicode_map
}

/// Formats the given time so that it matches what the PDF specification expects.
/// An example of it is the following: D:20170505150224+02'00'.
fn to_pdf_timestamp_format(date: &OffsetDateTime) -> String {
    let offset = date.offset();
    let offset_sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}{offset_sign}{:02}'{:02}'",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
        offset.whole_hours().abs(),
        offset.minutes_past_hour().abs(),
    )
}

/// A 32 characters-long alphanumeric identifier, used for the PDF `ID` tag.
fn random_identifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(32)
        .collect()
}
