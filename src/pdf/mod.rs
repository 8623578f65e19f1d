//! Printable documents: invoices and quotations.
//!
//! Rendering is a pure function over a fully-resolved payload; callers fetch
//! and join whatever the document needs (invoice, client, settings) and pick
//! the output sink themselves. The date stamp is passed in explicitly so two
//! renders of the same payload produce the same page content.

mod words;

pub use words::{amount_in_words, rupees_in_words};

use printpdf::{IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use time::Date;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid document payload: {0}")]
    Invalid(String),
    #[error("too many items for a single page")]
    TooManyItems,
    #[error("pdf assembly failed: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillTo {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub gstin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillItem {
    pub name: String,
    #[serde(default)]
    pub hsn: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
    pub quantity: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocTotals {
    pub subtotal: f64,
    pub tax: f64,
    pub final_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyInfo {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub footer_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDoc {
    pub invoice_number: String,
    pub client: BillTo,
    pub payment_mode: String,
    pub items: Vec<BillItem>,
    pub totals: DocTotals,
    pub company: CompanyInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationDoc {
    pub quotation_number: String,
    pub client: BillTo,
    pub items: Vec<BillItem>,
    pub estimated_total: f64,
    /// Filled in from the settings row by the export command; the front end
    /// does not need to send it.
    #[serde(default)]
    pub company: CompanyInfo,
}

pub fn format_rupees(v: f64) -> String {
    format!("₹{:.2}", v)
}

fn date_stamp(day: Date) -> String {
    format!("{:02}/{:02}/{:04}", day.day(), u8::from(day.month()), day.year())
}

// A4, millimetres.
const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN_X: f32 = 15.0;
const MARGIN_TOP: f32 = 14.0;
const MARGIN_BOTTOM: f32 = 14.0;

const CONTENT_LEFT: f32 = MARGIN_X;
const CONTENT_RIGHT: f32 = PAGE_W - MARGIN_X;

// Fixed vertical step per item row; the table never reflows.
const ROW_STEP: f32 = 6.2;
// Rows may not descend past this line: the totals block, words line and
// footer live below it.
const TABLE_FLOOR_Y: f32 = 86.0;

const NAME_SIZE: f32 = 15.0;
const TITLE_SIZE: f32 = 11.5;
const TEXT_SIZE: f32 = 8.5;
const HEADER_SIZE: f32 = 8.8;
const TOTAL_SIZE: f32 = 10.5;

static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

struct Page {
    layer: PdfLayerReference,
    font: IndirectFontRef,
    face: ttf_parser::Face<'static>,
}

impl Page {
    fn text(&self, s: &str, size: f32, x: f32, y: f32) {
        self.layer.use_text(s, size, Mm(x), Mm(y), &self.font);
    }

    /// Right-aligned text using real font metrics (numeric columns).
    fn text_right(&self, s: &str, size: f32, right: f32, y: f32) {
        let x = (right - self.width(s, size)).max(0.0);
        self.text(s, size, x, y);
    }

    fn text_centered(&self, s: &str, size: f32, y: f32) {
        let w = self.width(s, size);
        self.text(s, size, CONTENT_LEFT + (CONTENT_RIGHT - CONTENT_LEFT - w) / 2.0, y);
    }

    fn width(&self, s: &str, size: f32) -> f32 {
        const PT_TO_MM: f32 = 25.4 / 72.0;
        let upem = self.face.units_per_em() as f32;
        if upem <= 0.0 {
            return 0.0;
        }
        let mut units: u32 = 0;
        for ch in s.chars() {
            if let Some(gid) = self.face.glyph_index(ch) {
                units += u32::from(self.face.glyph_hor_advance(gid).unwrap_or(0));
            }
        }
        (units as f32 / upem) * size * PT_TO_MM
    }

    fn rule(&self, x1: f32, x2: f32, y: f32, thickness: f32) {
        self.layer.set_outline_thickness(thickness);
        self.layer.add_line(printpdf::Line {
            points: vec![
                (printpdf::Point::new(Mm(x1), Mm(y)), false),
                (printpdf::Point::new(Mm(x2), Mm(y)), false),
            ],
            is_closed: false,
        });
    }

    /// Word-wraps to a column width; a single overlong word is clipped.
    fn wrap(&self, s: &str, size: f32, max_w: f32) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        for word in s.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if self.width(&candidate, size) <= max_w {
                current = candidate;
            } else {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                current = self.clip(word, size, max_w);
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// Truncates so the text fits the column; rows have a fixed height.
    fn clip(&self, s: &str, size: f32, max_w: f32) -> String {
        if self.width(s, size) <= max_w {
            return s.to_string();
        }
        let mut out = String::new();
        for ch in s.chars() {
            let mut candidate = out.clone();
            candidate.push(ch);
            if self.width(&candidate, size) > max_w {
                break;
            }
            out = candidate;
        }
        out
    }
}

fn start_document(title: &str) -> Result<(PdfDocumentReference, Page), RenderError> {
    let (doc, page_idx, layer_idx) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let layer = doc.get_page(page_idx).get_layer(layer_idx);

    // One embedded Unicode font for everything; the builtin PDF fonts cannot
    // encode the rupee sign.
    let font = doc
        .add_external_font(Cursor::new(FONT_BYTES))
        .map_err(|e| RenderError::Pdf(e.to_string()))?;
    let face = ttf_parser::Face::parse(FONT_BYTES, 0)
        .map_err(|_| RenderError::Pdf("embedded font failed to parse".to_string()))?;

    Ok((doc, Page { layer, font, face }))
}

fn finish_document(doc: PdfDocumentReference) -> Result<Vec<u8>, RenderError> {
    let mut writer = std::io::BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer).map_err(|e| RenderError::Pdf(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| RenderError::Pdf(e.to_string()))
}

fn check_amount(label: &str, v: f64) -> Result<(), RenderError> {
    if !v.is_finite() || v < 0.0 {
        return Err(RenderError::Invalid(format!(
            "{} must be a finite, non-negative number",
            label
        )));
    }
    Ok(())
}

fn check_items(items: &[BillItem]) -> Result<(), RenderError> {
    if items.is_empty() {
        return Err(RenderError::Invalid("no items to print".to_string()));
    }
    for (idx, item) in items.iter().enumerate() {
        if item.quantity < 0 {
            return Err(RenderError::Invalid(format!(
                "item {}: quantity cannot be negative",
                idx + 1
            )));
        }
        check_amount(&format!("item {} price", idx + 1), item.price)?;
    }
    Ok(())
}

/// Company header: name, one printed line per newline-delimited address
/// segment, then a rule. Returns the y below the header.
fn draw_company_header(page: &Page, company: &CompanyInfo) -> f32 {
    let mut y = PAGE_H - MARGIN_TOP;

    let name = company.company_name.trim();
    let name = if name.is_empty() { "Your Pharmacy" } else { name };
    page.text_centered(name, NAME_SIZE, y);
    y -= 7.0;

    let mut printed_any = false;
    for segment in company.address.lines() {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        page.text_centered(segment, TEXT_SIZE, y);
        y -= 4.6;
        printed_any = true;
    }
    if !printed_any {
        page.text_centered("Address not set", TEXT_SIZE, y);
        y -= 4.6;
    }

    y -= 2.0;
    page.rule(CONTENT_LEFT, CONTENT_RIGHT, y, 0.85);
    y - 8.0
}

/// Two-column info block: bill-to identity on the left, document number /
/// date / payment on the right. Returns the y below the block.
fn draw_info_block(
    page: &Page,
    client: &BillTo,
    right_rows: &[(&str, String)],
    mut y: f32,
) -> f32 {
    let block_top = y;
    let left_max_w = (CONTENT_RIGHT - CONTENT_LEFT) * 0.55;

    let client_name = client.name.trim();
    let client_name = if client_name.is_empty() { "Walk-in Customer" } else { client_name };
    page.text(client_name, TITLE_SIZE, CONTENT_LEFT, y);
    y -= 5.4;

    for line in page.wrap(client.address.trim(), TEXT_SIZE, left_max_w) {
        page.text(&line, TEXT_SIZE, CONTENT_LEFT, y);
        y -= 4.4;
    }
    let phone = client.phone.trim();
    if !phone.is_empty() {
        page.text(&format!("Phone: {}", phone), TEXT_SIZE, CONTENT_LEFT, y);
        y -= 4.4;
    }
    if let Some(gstin) = client.gstin.as_deref() {
        let gstin = gstin.trim();
        if !gstin.is_empty() {
            page.text(&format!("GSTIN: {}", gstin), TEXT_SIZE, CONTENT_LEFT, y);
            y -= 4.4;
        }
    }

    let mut y_right = block_top;
    for (label, value) in right_rows {
        page.text_right(&format!("{}: {}", label, value), TEXT_SIZE, CONTENT_RIGHT, y_right);
        y_right -= 4.6;
    }

    y.min(y_right) - 4.0
}

struct Column {
    header: &'static str,
    // Left edge for text columns, right edge for numeric ones.
    anchor: f32,
    right_aligned: bool,
    max_w: f32,
}

/// Header band plus fixed-step rows. Returns the y below the table.
fn draw_item_table(
    page: &Page,
    columns: &[Column],
    rows: &[Vec<String>],
    mut y: f32,
) -> Result<f32, RenderError> {
    page.rule(CONTENT_LEFT, CONTENT_RIGHT, y, 0.60);
    y -= 5.2;
    for col in columns {
        if col.right_aligned {
            page.text_right(col.header, HEADER_SIZE, col.anchor, y);
        } else {
            page.text(col.header, HEADER_SIZE, col.anchor, y);
        }
    }
    y -= 2.2;
    page.rule(CONTENT_LEFT, CONTENT_RIGHT, y, 0.60);
    y -= ROW_STEP;

    for row in rows {
        if y < TABLE_FLOOR_Y {
            return Err(RenderError::TooManyItems);
        }
        for (col, cell) in columns.iter().zip(row) {
            if col.right_aligned {
                page.text_right(cell, TEXT_SIZE, col.anchor, y);
            } else {
                page.text(&page.clip(cell, TEXT_SIZE, col.max_w), TEXT_SIZE, col.anchor, y);
            }
        }
        y -= ROW_STEP;
    }

    y += ROW_STEP - 2.0;
    page.rule(CONTENT_LEFT, CONTENT_RIGHT, y, 0.40);
    Ok(y - 6.5)
}

fn draw_footer(page: &Page, company: &CompanyInfo) {
    let name = company.company_name.trim();
    let name = if name.is_empty() { "Your Pharmacy" } else { name };
    page.text_right(&format!("For {}", name), TEXT_SIZE, CONTENT_RIGHT, MARGIN_BOTTOM + 16.0);

    if let Some(footer) = company.footer_text.as_deref() {
        let footer = footer.trim();
        if !footer.is_empty() {
            page.text_centered(footer, TEXT_SIZE, MARGIN_BOTTOM + 4.0);
        }
    }
}

pub fn render_invoice(doc: &InvoiceDoc, today: Date) -> Result<Vec<u8>, RenderError> {
    check_items(&doc.items)?;
    check_amount("subtotal", doc.totals.subtotal)?;
    check_amount("tax", doc.totals.tax)?;
    check_amount("final amount", doc.totals.final_amount)?;

    let (pdf, page) = start_document("Invoice")?;

    let mut y = draw_company_header(&page, &doc.company);

    let right_rows = [
        ("Invoice No", doc.invoice_number.trim().to_string()),
        ("Date", date_stamp(today)),
        ("Payment", doc.payment_mode.trim().to_string()),
    ];
    y = draw_info_block(&page, &doc.client, &right_rows, y);

    let columns = [
        Column { header: "Medicine", anchor: CONTENT_LEFT, right_aligned: false, max_w: 62.0 },
        Column { header: "HSN", anchor: 81.0, right_aligned: false, max_w: 18.0 },
        Column { header: "Batch No", anchor: 103.0, right_aligned: false, max_w: 24.0 },
        Column { header: "Qty", anchor: 141.0, right_aligned: true, max_w: 0.0 },
        Column { header: "Rate", anchor: 167.0, right_aligned: true, max_w: 0.0 },
        Column { header: "Amount", anchor: CONTENT_RIGHT, right_aligned: true, max_w: 0.0 },
    ];
    let rows: Vec<Vec<String>> = doc
        .items
        .iter()
        .map(|item| {
            vec![
                item.name.clone(),
                item.hsn.clone().unwrap_or_default(),
                item.batch_number.clone().unwrap_or_default(),
                item.quantity.to_string(),
                format_rupees(item.price),
                format_rupees(item.price * item.quantity as f64),
            ]
        })
        .collect();
    y = draw_item_table(&page, &columns, &rows, y)?;

    // Totals, tax split evenly across the two GST heads.
    let label_x = 118.0;
    let half_tax = doc.totals.tax / 2.0;
    for (label, value) in [
        ("Subtotal", doc.totals.subtotal),
        ("SGST", half_tax),
        ("CGST", half_tax),
    ] {
        page.text(label, HEADER_SIZE, label_x, y);
        page.text_right(&format_rupees(value), HEADER_SIZE, CONTENT_RIGHT, y);
        y -= 5.6;
    }
    y -= 0.6;
    page.rule(label_x, CONTENT_RIGHT, y + 3.4, 0.60);
    page.text("Grand Total", TOTAL_SIZE, label_x, y);
    page.text_right(&format_rupees(doc.totals.final_amount), TOTAL_SIZE, CONTENT_RIGHT, y);
    y -= 8.0;

    let words = format!("Amount in Words: {}", amount_in_words(doc.totals.final_amount));
    for line in page.wrap(&words, TEXT_SIZE, CONTENT_RIGHT - CONTENT_LEFT) {
        page.text(&line, TEXT_SIZE, CONTENT_LEFT, y);
        y -= 4.4;
    }

    draw_footer(&page, &doc.company);

    finish_document(pdf)
}

pub fn render_quotation(doc: &QuotationDoc, today: Date) -> Result<Vec<u8>, RenderError> {
    check_items(&doc.items)?;
    check_amount("estimated total", doc.estimated_total)?;

    let (pdf, page) = start_document("Quotation")?;

    let mut y = draw_company_header(&page, &doc.company);

    let right_rows = [
        ("Quotation No", doc.quotation_number.trim().to_string()),
        ("Date", date_stamp(today)),
    ];
    y = draw_info_block(&page, &doc.client, &right_rows, y);

    let columns = [
        Column { header: "Description", anchor: CONTENT_LEFT, right_aligned: false, max_w: 110.0 },
        Column { header: "Qty", anchor: 145.0, right_aligned: true, max_w: 0.0 },
        Column { header: "Rate", anchor: 170.0, right_aligned: true, max_w: 0.0 },
        Column { header: "Amount", anchor: CONTENT_RIGHT, right_aligned: true, max_w: 0.0 },
    ];
    let rows: Vec<Vec<String>> = doc
        .items
        .iter()
        .map(|item| {
            vec![
                item.name.clone(),
                item.quantity.to_string(),
                format_rupees(item.price),
                format_rupees(item.price * item.quantity as f64),
            ]
        })
        .collect();
    y = draw_item_table(&page, &columns, &rows, y)?;

    // No tax breakdown on a quotation, only the estimate.
    page.text("Estimated Total", TOTAL_SIZE, 118.0, y);
    page.text_right(&format_rupees(doc.estimated_total), TOTAL_SIZE, CONTENT_RIGHT, y);

    draw_footer(&page, &doc.company);

    finish_document(pdf)
}
