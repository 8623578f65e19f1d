//! Sale recording: the invoice commit transaction and invoice numbering.
//!
//! Everything here operates on an explicitly passed connection so the
//! composition root (and the tests) own the handle.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SaleError {
    #[error("{0}")]
    Validation(String),
    #[error("sale could not be persisted: {}", crate::sqlite_error_string(.0))]
    Persistence(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Completed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Completed => "COMPLETED",
        }
    }

    fn parse(raw: &str) -> InvoiceStatus {
        match raw {
            "DRAFT" => InvoiceStatus::Draft,
            _ => InvoiceStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    Cash,
    Card,
    Upi,
    Credit,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "CASH",
            PaymentMode::Card => "CARD",
            PaymentMode::Upi => "UPI",
            PaymentMode::Credit => "CREDIT",
        }
    }

    fn parse(raw: &str) -> PaymentMode {
        match raw {
            "CARD" => PaymentMode::Card,
            "UPI" => PaymentMode::Upi,
            "CREDIT" => PaymentMode::Credit,
            _ => PaymentMode::Cash,
        }
    }
}

/// One line of a persisted invoice, joined with the medicine it sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub id: String,
    pub medicine_id: String,
    pub medicine_name: String,
    #[serde(default)]
    pub hsn: Option<String>,
    #[serde(default)]
    pub batch_number: String,
    pub quantity: i64,
    pub free_quantity: i64,
    pub unit_price: f64,
    pub ptr: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub invoice_number: String,
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub sales_rep_id: Option<String>,
    pub total_amount: f64,
    pub discount: f64,
    pub tax: f64,
    pub final_amount: f64,
    pub payment_mode: PaymentMode,
    pub status: InvoiceStatus,
    pub created_at: String,
    pub items: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoiceLine {
    pub medicine_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub free_quantity: i64,
    pub unit_price: f64,
    #[serde(default)]
    pub ptr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub client_id: String,
    #[serde(default)]
    pub sales_rep_id: Option<String>,
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub status: Option<InvoiceStatus>,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub tax: f64,
    pub items: Vec<NewInvoiceLine>,
}

const NUMBER_PREFIX: &str = "INV";

fn date_token(day: Date) -> String {
    format!("{:04}{:02}{:02}", day.year(), u8::from(day.month()), day.day())
}

pub fn format_invoice_number(day: Date, seq: i64) -> String {
    format!("{}-{}-{:03}", NUMBER_PREFIX, date_token(day), seq)
}

fn same_day_count(conn: &Connection, day: Date) -> Result<i64, rusqlite::Error> {
    // invoice_number is date-scoped by construction, so a prefix match is the
    // daily count; the UNIQUE index on invoice_number serves this query.
    conn.query_row(
        "SELECT COUNT(1) FROM invoices WHERE invoice_number LIKE ?1",
        params![format!("{}-{}-%", NUMBER_PREFIX, date_token(day))],
        |r| r.get(0),
    )
}

/// Read-only preview of the number the next commit would assign.
pub fn next_invoice_number(conn: &Connection, day: Date) -> Result<String, rusqlite::Error> {
    Ok(format_invoice_number(day, same_day_count(conn, day)? + 1))
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(sql, params![id], |r| r.get(0))
}

fn validate(conn: &Connection, input: &NewInvoice) -> Result<(), SaleError> {
    if input.items.is_empty() {
        return Err(SaleError::Validation(
            "an invoice needs at least one item".to_string(),
        ));
    }
    for amount in [input.discount, input.tax] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(SaleError::Validation(
                "discount and tax must be non-negative amounts".to_string(),
            ));
        }
    }
    if !exists(conn, "SELECT EXISTS(SELECT 1 FROM parties WHERE id = ?1)", &input.client_id)? {
        return Err(SaleError::Validation(format!(
            "unknown client: {}",
            input.client_id
        )));
    }
    if let Some(rep_id) = input.sales_rep_id.as_deref() {
        if !exists(conn, "SELECT EXISTS(SELECT 1 FROM sales_reps WHERE id = ?1)", rep_id)? {
            return Err(SaleError::Validation(format!("unknown sales rep: {}", rep_id)));
        }
    }
    for (idx, line) in input.items.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(SaleError::Validation(format!(
                "item {}: quantity must be a positive integer",
                idx + 1
            )));
        }
        if line.free_quantity < 0 {
            return Err(SaleError::Validation(format!(
                "item {}: free quantity cannot be negative",
                idx + 1
            )));
        }
        if !line.unit_price.is_finite() || line.unit_price < 0.0 {
            return Err(SaleError::Validation(format!(
                "item {}: unit price must be a non-negative amount",
                idx + 1
            )));
        }
        if !exists(conn, "SELECT EXISTS(SELECT 1 FROM medicines WHERE id = ?1)", &line.medicine_id)? {
            return Err(SaleError::Validation(format!(
                "item {}: unknown medicine: {}",
                idx + 1,
                line.medicine_id
            )));
        }
    }
    Ok(())
}

/// Durably records a sale: one invoice header, one row per line item and one
/// stock decrement per line item, all inside a single IMMEDIATE transaction.
///
/// The invoice number is derived from the same-day count inside the same
/// transaction as the insert, so two near-simultaneous commits cannot observe
/// the same sequence value.
///
/// Stock is decremented by the billed quantity without clamping; a sale that
/// exceeds the recorded stock drives it negative rather than failing.
pub fn commit_invoice(
    conn: &mut Connection,
    input: &NewInvoice,
    day: Date,
) -> Result<Invoice, SaleError> {
    validate(conn, input)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let invoice_number = format_invoice_number(day, same_day_count(&tx, day)? + 1);

    let total_amount: f64 = input
        .items
        .iter()
        .map(|line| line.unit_price * line.quantity as f64)
        .sum();
    let final_amount = (total_amount + input.tax - input.discount).round();

    let id = Uuid::new_v4().to_string();
    let status = input.status.unwrap_or(InvoiceStatus::Completed);
    let created_at = crate::now_iso();

    tx.execute(
        r#"INSERT INTO invoices (
            id, invoice_number, client_id, sales_rep_id,
            total_amount, discount, tax, final_amount,
            payment_mode, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        params![
            id,
            invoice_number,
            input.client_id,
            input.sales_rep_id,
            total_amount,
            input.discount,
            input.tax,
            final_amount,
            input.payment_mode.as_str(),
            status.as_str(),
            created_at,
        ],
    )?;

    for line in &input.items {
        tx.execute(
            r#"INSERT INTO invoice_items (
                id, invoice_id, medicine_id, quantity, free_quantity,
                unit_price, ptr, total_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                Uuid::new_v4().to_string(),
                id,
                line.medicine_id,
                line.quantity,
                line.free_quantity,
                line.unit_price,
                line.ptr,
                line.unit_price * line.quantity as f64,
            ],
        )?;
        tx.execute(
            "UPDATE medicines SET stock = stock - ?1, updated_at = ?2 WHERE id = ?3",
            params![line.quantity, created_at, line.medicine_id],
        )?;
    }

    tx.commit()?;

    read_invoice(conn, &id)?.ok_or(SaleError::Persistence(rusqlite::Error::QueryReturnedNoRows))
}

fn invoice_lines(conn: &Connection, invoice_id: &str) -> Result<Vec<InvoiceLine>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        r#"SELECT it.id, it.medicine_id, m.name, m.hsn, m.batch_number,
                  it.quantity, it.free_quantity, it.unit_price, it.ptr, it.total_price
           FROM invoice_items it
           JOIN medicines m ON m.id = it.medicine_id
           WHERE it.invoice_id = ?1
           ORDER BY it.rowid"#,
    )?;
    let rows = stmt.query_map(params![invoice_id], |r| {
        Ok(InvoiceLine {
            id: r.get(0)?,
            medicine_id: r.get(1)?,
            medicine_name: r.get(2)?,
            hsn: r.get(3)?,
            batch_number: r.get(4)?,
            quantity: r.get(5)?,
            free_quantity: r.get(6)?,
            unit_price: r.get(7)?,
            ptr: r.get(8)?,
            total_price: r.get(9)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn invoice_from_row(r: &rusqlite::Row<'_>) -> Result<Invoice, rusqlite::Error> {
    Ok(Invoice {
        id: r.get(0)?,
        invoice_number: r.get(1)?,
        client_id: r.get(2)?,
        client_name: r.get(3)?,
        sales_rep_id: r.get(4)?,
        total_amount: r.get(5)?,
        discount: r.get(6)?,
        tax: r.get(7)?,
        final_amount: r.get(8)?,
        payment_mode: PaymentMode::parse(&r.get::<_, String>(9)?),
        status: InvoiceStatus::parse(&r.get::<_, String>(10)?),
        created_at: r.get(11)?,
        items: Vec::new(),
    })
}

const INVOICE_SELECT: &str = r#"SELECT i.id, i.invoice_number, i.client_id, p.name,
       i.sales_rep_id, i.total_amount, i.discount, i.tax, i.final_amount,
       i.payment_mode, i.status, i.created_at
       FROM invoices i JOIN parties p ON p.id = i.client_id"#;

pub fn read_invoice(conn: &Connection, id: &str) -> Result<Option<Invoice>, rusqlite::Error> {
    let header = conn
        .query_row(
            &format!("{} WHERE i.id = ?1", INVOICE_SELECT),
            params![id],
            invoice_from_row,
        )
        .optional()?;
    let Some(mut invoice) = header else {
        return Ok(None);
    };
    invoice.items = invoice_lines(conn, &invoice.id)?;
    Ok(Some(invoice))
}

pub fn list_invoices(conn: &Connection) -> Result<Vec<Invoice>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY i.created_at DESC", INVOICE_SELECT))?;
    let rows = stmt.query_map([], invoice_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    for invoice in &mut out {
        invoice.items = invoice_lines(conn, &invoice.id)?;
    }
    Ok(out)
}

/// Invoices whose creation date (YYYY-MM-DD) falls in the inclusive range.
pub fn list_invoices_range(
    conn: &Connection,
    from: &str,
    to: &str,
) -> Result<Vec<Invoice>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        r#"{} WHERE substr(i.created_at, 1, 10) >= ?1 AND substr(i.created_at, 1, 10) <= ?2
           ORDER BY i.created_at ASC"#,
        INVOICE_SELECT
    ))?;
    let rows = stmt.query_map(params![from, to], invoice_from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    for invoice in &mut out {
        invoice.items = invoice_lines(conn, &invoice.id)?;
    }
    Ok(out)
}

/// Sum of completed sales attributed to a rep in a month (YYYY-MM).
pub fn rep_achieved_amount(
    conn: &Connection,
    rep_id: &str,
    month: &str,
) -> Result<f64, rusqlite::Error> {
    conn.query_row(
        r#"SELECT COALESCE(SUM(final_amount), 0)
           FROM invoices
           WHERE sales_rep_id = ?1 AND status = 'COMPLETED' AND substr(created_at, 1, 7) = ?2"#,
        params![rep_id, month],
        |r| r.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    fn day(year: i32, month: Month, dom: u8) -> Date {
        Date::from_calendar_date(year, month, dom).unwrap()
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::configure_sqlite(&conn).unwrap();
        crate::init_schema(&conn).unwrap();
        conn
    }

    fn seed_client(conn: &Connection, id: &str, name: &str) {
        conn.execute(
            "INSERT INTO parties (id, name, role, phone, address, gstin, created_at)
             VALUES (?1, ?2, 'CLIENT', '', '', NULL, ?3)",
            params![id, name, crate::now_iso()],
        )
        .unwrap();
    }

    fn seed_medicine(conn: &Connection, id: &str, name: &str, price: f64, stock: i64) {
        let now = crate::now_iso();
        conn.execute(
            "INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
             VALUES (?1, ?2, 'B-100', '2027-01-31', ?3, ?4, '3004', ?5, ?5)",
            params![id, name, price, stock, now],
        )
        .unwrap();
    }

    fn stock_of(conn: &Connection, id: &str) -> i64 {
        conn.query_row("SELECT stock FROM medicines WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(1) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    fn sale(client: &str, items: Vec<NewInvoiceLine>) -> NewInvoice {
        NewInvoice {
            client_id: client.to_string(),
            sales_rep_id: None,
            payment_mode: PaymentMode::Cash,
            status: None,
            discount: 0.0,
            tax: 0.0,
            items,
        }
    }

    fn line(medicine: &str, quantity: i64, unit_price: f64) -> NewInvoiceLine {
        NewInvoiceLine {
            medicine_id: medicine.to_string(),
            quantity,
            free_quantity: 0,
            unit_price,
            ptr: 0.0,
        }
    }

    #[test]
    fn commit_persists_header_items_and_stock() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "City Clinic");
        seed_medicine(&conn, "m1", "Paracetamol 500", 10.0, 50);
        seed_medicine(&conn, "m2", "Cough Syrup", 25.0, 20);

        let mut input = sale("c1", vec![line("m1", 3, 10.0), line("m2", 1, 25.0)]);
        input.tax = 2.75;

        let invoice = commit_invoice(&mut conn, &input, day(2026, Month::March, 15)).unwrap();

        assert_eq!(invoice.invoice_number, "INV-20260315-001");
        assert_eq!(invoice.total_amount, 55.0);
        assert_eq!(invoice.tax, 2.75);
        assert_eq!(invoice.final_amount, 58.0);
        assert_eq!(invoice.status, InvoiceStatus::Completed);
        assert_eq!(invoice.client_name, "City Clinic");

        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.items[0].medicine_id, "m1");
        assert_eq!(invoice.items[0].total_price, 30.0);
        assert_eq!(invoice.items[1].medicine_id, "m2");
        assert_eq!(invoice.items[1].total_price, 25.0);

        assert_eq!(stock_of(&conn, "m1"), 47);
        assert_eq!(stock_of(&conn, "m2"), 19);

        let persisted = read_invoice(&conn, &invoice.id).unwrap().unwrap();
        assert_eq!(persisted.total_amount, 55.0);
        assert_eq!(
            persisted.items.iter().map(|l| l.total_price).sum::<f64>(),
            persisted.total_amount
        );
    }

    #[test]
    fn invoice_numbers_are_date_scoped_sequences() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Ibuprofen", 5.0, 100);

        let march = day(2026, Month::March, 15);
        let first = commit_invoice(&mut conn, &sale("c1", vec![line("m1", 1, 5.0)]), march).unwrap();
        let second = commit_invoice(&mut conn, &sale("c1", vec![line("m1", 1, 5.0)]), march).unwrap();
        assert_eq!(first.invoice_number, "INV-20260315-001");
        assert_eq!(second.invoice_number, "INV-20260315-002");

        assert_eq!(next_invoice_number(&conn, march).unwrap(), "INV-20260315-003");

        // A new day restarts the sequence.
        let april = day(2026, Month::April, 1);
        assert_eq!(next_invoice_number(&conn, april).unwrap(), "INV-20260401-001");
        let rolled = commit_invoice(&mut conn, &sale("c1", vec![line("m1", 1, 5.0)]), april).unwrap();
        assert_eq!(rolled.invoice_number, "INV-20260401-001");
    }

    #[test]
    fn rejects_empty_item_list() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");

        let err = commit_invoice(&mut conn, &sale("c1", vec![]), day(2026, Month::March, 15));
        assert!(matches!(err, Err(SaleError::Validation(_))));
        assert_eq!(count(&conn, "invoices"), 0);
    }

    #[test]
    fn rejects_unknown_medicine_without_partial_writes() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Amoxicillin", 12.0, 30);

        let input = sale("c1", vec![line("m1", 2, 12.0), line("ghost", 1, 9.0)]);
        let err = commit_invoice(&mut conn, &input, day(2026, Month::March, 15));

        assert!(matches!(err, Err(SaleError::Validation(_))));
        assert_eq!(count(&conn, "invoices"), 0);
        assert_eq!(count(&conn, "invoice_items"), 0);
        assert_eq!(stock_of(&conn, "m1"), 30);
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Amoxicillin", 12.0, 30);

        for bad in [0, -4] {
            let err = commit_invoice(
                &mut conn,
                &sale("c1", vec![line("m1", bad, 12.0)]),
                day(2026, Month::March, 15),
            );
            assert!(matches!(err, Err(SaleError::Validation(_))));
        }
        assert_eq!(count(&conn, "invoices"), 0);
        assert_eq!(stock_of(&conn, "m1"), 30);
    }

    #[test]
    fn constraint_failure_rolls_back_everything() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Cetirizine", 8.0, 40);

        // Occupy the number the commit will derive (one prior same-day invoice
        // makes the next sequence 002): the header insert hits the UNIQUE
        // constraint and the whole transaction must disappear.
        let march = day(2026, Month::March, 15);
        conn.execute(
            r#"INSERT INTO invoices (id, invoice_number, client_id, sales_rep_id,
                total_amount, discount, tax, final_amount, payment_mode, status, created_at)
               VALUES ('pre', 'INV-20260315-002', 'c1', NULL, 0, 0, 0, 0, 'CASH', 'COMPLETED', ?1)"#,
            params![crate::now_iso()],
        )
        .unwrap();

        let err = commit_invoice(&mut conn, &sale("c1", vec![line("m1", 4, 8.0)]), march);

        assert!(matches!(err, Err(SaleError::Persistence(_))));
        assert_eq!(count(&conn, "invoices"), 1);
        assert_eq!(count(&conn, "invoice_items"), 0);
        assert_eq!(stock_of(&conn, "m1"), 40);
    }

    #[test]
    fn stock_is_not_clamped_and_may_go_negative() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "ORS Sachet", 2.0, 2);

        let invoice = commit_invoice(
            &mut conn,
            &sale("c1", vec![line("m1", 5, 2.0)]),
            day(2026, Month::March, 15),
        )
        .unwrap();

        assert_eq!(invoice.total_amount, 10.0);
        assert_eq!(stock_of(&conn, "m1"), -3);
    }

    #[test]
    fn free_quantity_is_informational_only() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Vitamin C", 10.0, 50);

        let mut item = line("m1", 2, 10.0);
        item.free_quantity = 1;
        let invoice = commit_invoice(
            &mut conn,
            &sale("c1", vec![item]),
            day(2026, Month::March, 15),
        )
        .unwrap();

        // Billed quantity drives both the amount and the stock decrement.
        assert_eq!(invoice.total_amount, 20.0);
        assert_eq!(invoice.items[0].free_quantity, 1);
        assert_eq!(stock_of(&conn, "m1"), 48);
    }

    #[test]
    fn discount_reduces_final_amount_before_rounding() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Insulin Pen", 450.0, 10);

        let mut input = sale("c1", vec![line("m1", 2, 450.0)]);
        input.discount = 50.5;
        input.tax = 45.0;
        let invoice = commit_invoice(&mut conn, &input, day(2026, Month::March, 15)).unwrap();

        assert_eq!(invoice.total_amount, 900.0);
        // round(900 + 45 - 50.5) = round(894.5) = 895
        assert_eq!(invoice.final_amount, 895.0);
    }

    #[test]
    fn rep_attribution_feeds_monthly_achievement() {
        let mut conn = test_conn();
        seed_client(&conn, "c1", "Walk-in");
        seed_medicine(&conn, "m1", "Calcium Tabs", 20.0, 100);
        conn.execute(
            "INSERT INTO sales_reps (id, name, phone, created_at) VALUES ('r1', 'Asha', '', ?1)",
            params![crate::now_iso()],
        )
        .unwrap();

        let mut input = sale("c1", vec![line("m1", 5, 20.0)]);
        input.sales_rep_id = Some("r1".to_string());
        let invoice = commit_invoice(&mut conn, &input, day(2026, Month::March, 15)).unwrap();

        let month = &invoice.created_at[..7];
        let achieved = rep_achieved_amount(&conn, "r1", month).unwrap();
        assert_eq!(achieved, invoice.final_amount);
        assert_eq!(rep_achieved_amount(&conn, "r1", "1999-01").unwrap(), 0.0);
    }
}
