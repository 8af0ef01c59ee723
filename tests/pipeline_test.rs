use pdfpress::layout::{self, ImageResource, PageGeometry};
use pdfpress::pdf::Renderer;

/// Exercises the layout engine and the renderer together the way the build pipeline does,
/// on real image files.
#[test]
fn a_layout_with_images_renders_into_a_matching_multi_page_document() {
    let directory = tempfile::tempdir().unwrap();

    let wide_path = directory.path().join("wide.png");
    image::RgbImage::from_pixel(800, 200, image::Rgb([200, 80, 40]))
        .save(&wide_path)
        .unwrap();
    let tall_path = directory.path().join("tall.png");
    image::RgbImage::from_pixel(100, 1800, image::Rgb([40, 80, 200]))
        .save(&tall_path)
        .unwrap();

    let resources = vec![
        ImageResource::from_path(&wide_path).unwrap(),
        ImageResource::from_path(&tall_path).unwrap(),
    ];

    let renderer = Renderer::new(&[]);
    let geometry = PageGeometry::default();
    let pages = layout::layout(
        Some("A caption above the pictures"),
        &resources,
        &geometry,
        renderer.font(),
    );
    assert!(pages.len() >= 2, "the tall image forces a second page");

    let pdf_document_bytes = renderer.render(&pages, &resources, &geometry).unwrap();
    let pdf_document = lopdf::Document::load_mem(&pdf_document_bytes).unwrap();
    assert_eq!(pdf_document.get_pages().len(), pages.len());
}

#[test]
fn jpeg_images_round_trip_through_the_renderer() {
    let directory = tempfile::tempdir().unwrap();
    let photo_path = directory.path().join("photo.jpg");
    image::RgbImage::from_pixel(320, 240, image::Rgb([90, 110, 130]))
        .save(&photo_path)
        .unwrap();

    let resources = vec![ImageResource::from_path(&photo_path).unwrap()];
    let renderer = Renderer::new(&[]);
    let geometry = PageGeometry::default();
    let pages = layout::layout(None, &resources, &geometry, renderer.font());

    let pdf_document_bytes = renderer.render(&pages, &resources, &geometry).unwrap();
    assert!(lopdf::Document::load_mem(&pdf_document_bytes).is_ok());
}
