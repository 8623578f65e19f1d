use serde::{Deserialize, Serialize};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tauri::Manager;

use rusqlite::{params, Connection, OptionalExtension};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

pub mod pdf;
pub mod sales;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Singleton company profile printed on every document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub company_name: String,
    pub address: String,
    pub phone: String,
    pub gstin: String,
    #[serde(default)]
    pub footer_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub gstin: Option<String>,
    #[serde(default)]
    pub footer_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<String>,
    pub price: f64,
    pub stock: i64,
    #[serde(default)]
    pub hsn: Option<String>,
    /// Supplied by the item group linked through the HSN code, if any.
    #[serde(default)]
    pub gst_percentage: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicine {
    pub name: String,
    #[serde(default)]
    pub batch_number: String,
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub hsn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicinePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<Option<String>>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub hsn: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyRole {
    Client,
    Supplier,
}

impl PartyRole {
    fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Client => "CLIENT",
            PartyRole::Supplier => "SUPPLIER",
        }
    }

    fn parse(raw: &str) -> PartyRole {
        match raw {
            "SUPPLIER" => PartyRole::Supplier,
            _ => PartyRole::Client,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: String,
    pub name: String,
    pub role: PartyRole,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub gstin: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParty {
    pub name: String,
    pub role: PartyRole,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub gstin: Option<String>,
}

/// HSN-keyed classification; linking a medicine to a group by HSN supplies
/// its GST rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemGroup {
    pub hsn_code: String,
    pub gst_percentage: f64,
    #[serde(default)]
    pub measure: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesRep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSalesRep {
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

/// Monthly target vs. what the rep's completed invoices actually add up to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepPerformance {
    pub rep_id: String,
    pub month: String,
    pub target_amount: f64,
    pub achieved_amount: f64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SETTINGS_ID: &str = "default";

pub(crate) fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn today() -> time::Date {
    OffsetDateTime::now_utc().date()
}

pub(crate) fn sqlite_error_string(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let message = msg.clone().unwrap_or_else(|| "".to_string());
            format!(
                "sqlite(code={:?}, extended_code={}, msg={})",
                code.code, code.extended_code, message
            )
        }
        other => other.to_string(),
    }
}

fn resolve_db_path(app: &tauri::AppHandle) -> Result<PathBuf, String> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(dir) = app.path().app_data_dir() {
        candidates.push(dir.join("medibill.db"));
    }
    if let Ok(dir) = app.path().app_local_data_dir() {
        candidates.push(dir.join("medibill.db"));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("medibill.db"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("medibill.db"));
    }

    for p in &candidates {
        if p.exists() {
            return Ok(p.clone());
        }
    }

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| "Unable to resolve database path".to_string())
}

pub(crate) fn configure_sqlite(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Apply PRAGMAs on init (outside any transaction).
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

pub(crate) fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id TEXT PRIMARY KEY NOT NULL,
            company_name TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            gstin TEXT NOT NULL DEFAULT '',
            footer_text TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS medicines (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            batch_number TEXT NOT NULL DEFAULT '',
            expiry_date TEXT,
            price REAL NOT NULL DEFAULT 0,
            stock INTEGER NOT NULL DEFAULT 0,
            hsn TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS parties (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('CLIENT', 'SUPPLIER')),
            phone TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            gstin TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (name, role)
        );

        CREATE TABLE IF NOT EXISTS item_groups (
            hsn_code TEXT PRIMARY KEY NOT NULL,
            gst_percentage REAL NOT NULL,
            measure TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS sales_reps (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rep_targets (
            rep_id TEXT NOT NULL REFERENCES sales_reps(id),
            month TEXT NOT NULL,
            target_amount REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (rep_id, month)
        );

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY NOT NULL,
            invoice_number TEXT NOT NULL UNIQUE,
            client_id TEXT NOT NULL REFERENCES parties(id),
            sales_rep_id TEXT REFERENCES sales_reps(id),
            total_amount REAL NOT NULL,
            discount REAL NOT NULL DEFAULT 0,
            tax REAL NOT NULL DEFAULT 0,
            final_amount REAL NOT NULL,
            payment_mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'COMPLETED',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS invoice_items (
            id TEXT PRIMARY KEY NOT NULL,
            invoice_id TEXT NOT NULL REFERENCES invoices(id),
            medicine_id TEXT NOT NULL REFERENCES medicines(id),
            quantity INTEGER NOT NULL,
            free_quantity INTEGER NOT NULL DEFAULT 0,
            unit_price REAL NOT NULL,
            ptr REAL NOT NULL DEFAULT 0,
            total_price REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_medicines_name ON medicines(name);
        CREATE INDEX IF NOT EXISTS idx_invoices_client_id ON invoices(client_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_created_at ON invoices(created_at);
        CREATE INDEX IF NOT EXISTS idx_invoice_items_invoice_id ON invoice_items(invoice_id);
        "#,
    )?;
    Ok(())
}

fn apply_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    // v=0 typically means a fresh DB (init_schema created the latest tables).
    if v == 0 {
        conn.execute_batch("PRAGMA user_version = 2;")?;
        return Ok(());
    }

    if v < 2 {
        conn.execute_batch(
            "ALTER TABLE settings ADD COLUMN footer_text TEXT NOT NULL DEFAULT '';\n\
             CREATE TABLE IF NOT EXISTS rep_targets (\n\
                rep_id TEXT NOT NULL REFERENCES sales_reps(id),\n\
                month TEXT NOT NULL,\n\
                target_amount REAL NOT NULL DEFAULT 0,\n\
                PRIMARY KEY (rep_id, month)\n\
             );\n\
             PRAGMA user_version = 2;\n",
        )?;
    }

    Ok(())
}

fn ensure_settings_row(conn: &Connection) -> Result<(), rusqlite::Error> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM settings WHERE id = ?1",
            params![SETTINGS_ID],
            |row| row.get(0),
        )
        .unwrap_or(0);
    if count > 0 {
        return Ok(());
    }

    conn.execute(
        r#"INSERT INTO settings (id, company_name, address, phone, gstin, footer_text, updated_at)
           VALUES (?1, '', '', '', '', '', ?2)"#,
        params![SETTINGS_ID, now_iso()],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Database state
// ---------------------------------------------------------------------------

trait OpError {
    fn into_message(self) -> String;
}

impl OpError for rusqlite::Error {
    fn into_message(self) -> String {
        sqlite_error_string(&self)
    }
}

impl OpError for sales::SaleError {
    fn into_message(self) -> String {
        self.to_string()
    }
}

#[derive(Clone)]
struct DbState {
    conn: Arc<Mutex<Connection>>,
    write_lock: Arc<Mutex<()>>,
}

impl DbState {
    fn new(app: &tauri::AppHandle) -> Result<Self, String> {
        let path = resolve_db_path(app)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        configure_sqlite(&conn).map_err(|e| e.to_string())?;
        init_schema(&conn).map_err(|e| e.to_string())?;
        apply_migrations(&conn).map_err(|e| e.to_string())?;
        ensure_settings_row(&conn).map_err(|e| e.to_string())?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn with_read<T, E, F>(&self, op_name: &'static str, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        E: OpError + Send + 'static,
        F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    {
        let conn = self.conn.clone();
        tauri::async_runtime::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| "db mutex poisoned".to_string())?;
            f(&guard).map_err(|e| {
                let msg = e.into_message();
                eprintln!("[sqlite] {{ op: {:?}, error: {:?} }}", op_name, msg);
                msg
            })
        })
        .await
        .map_err(|e| e.to_string())?
    }

    async fn with_write<T, E, F>(&self, op_name: &'static str, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        E: OpError + Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    {
        let conn = self.conn.clone();
        let write_lock = self.write_lock.clone();
        tauri::async_runtime::spawn_blocking(move || {
            let _wg = write_lock.lock().map_err(|_| "write mutex poisoned".to_string())?;
            let mut guard = conn.lock().map_err(|_| "db mutex poisoned".to_string())?;
            f(&mut guard).map_err(|e| {
                let msg = e.into_message();
                eprintln!("[sqlite] {{ op: {:?}, error: {:?} }}", op_name, msg);
                msg
            })
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

// ---------------------------------------------------------------------------
// Row readers
// ---------------------------------------------------------------------------

fn read_settings_from_conn(conn: &Connection) -> Result<Settings, rusqlite::Error> {
    conn.query_row(
        "SELECT company_name, address, phone, gstin, footer_text FROM settings WHERE id = ?1",
        params![SETTINGS_ID],
        |r| {
            Ok(Settings {
                company_name: r.get(0)?,
                address: r.get(1)?,
                phone: r.get(2)?,
                gstin: r.get(3)?,
                footer_text: r.get(4)?,
            })
        },
    )
}

fn apply_settings_patch(conn: &Connection, patch: &SettingsPatch) -> Result<Settings, rusqlite::Error> {
    let mut s = read_settings_from_conn(conn)?;
    if let Some(v) = &patch.company_name {
        s.company_name = v.clone();
    }
    if let Some(v) = &patch.address {
        s.address = v.clone();
    }
    if let Some(v) = &patch.phone {
        s.phone = v.clone();
    }
    if let Some(v) = &patch.gstin {
        s.gstin = v.clone();
    }
    if let Some(v) = &patch.footer_text {
        s.footer_text = v.clone();
    }

    conn.execute(
        r#"UPDATE settings SET company_name=?2, address=?3, phone=?4, gstin=?5, footer_text=?6, updated_at=?7
           WHERE id=?1"#,
        params![SETTINGS_ID, s.company_name, s.address, s.phone, s.gstin, s.footer_text, now_iso()],
    )?;
    Ok(s)
}

const MEDICINE_SELECT: &str = r#"SELECT m.id, m.name, m.batch_number, m.expiry_date, m.price,
       m.stock, m.hsn, g.gst_percentage, m.created_at, m.updated_at
       FROM medicines m LEFT JOIN item_groups g ON g.hsn_code = m.hsn"#;

fn medicine_from_row(r: &rusqlite::Row<'_>) -> Result<Medicine, rusqlite::Error> {
    Ok(Medicine {
        id: r.get(0)?,
        name: r.get(1)?,
        batch_number: r.get(2)?,
        expiry_date: r.get(3)?,
        price: r.get(4)?,
        stock: r.get(5)?,
        hsn: r.get(6)?,
        gst_percentage: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

fn read_medicine_from_conn(conn: &Connection, id: &str) -> Result<Option<Medicine>, rusqlite::Error> {
    conn.query_row(
        &format!("{} WHERE m.id = ?1", MEDICINE_SELECT),
        params![id],
        medicine_from_row,
    )
    .optional()
}

fn collect_medicines(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Medicine>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("{} {}", MEDICINE_SELECT, where_clause))?;
    let rows = stmt.query_map(args, medicine_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn party_from_row(r: &rusqlite::Row<'_>) -> Result<Party, rusqlite::Error> {
    Ok(Party {
        id: r.get(0)?,
        name: r.get(1)?,
        role: PartyRole::parse(&r.get::<_, String>(2)?),
        phone: r.get(3)?,
        address: r.get(4)?,
        gstin: r.get(5)?,
        created_at: r.get(6)?,
    })
}

const PARTY_SELECT: &str =
    "SELECT id, name, role, phone, address, gstin, created_at FROM parties";

fn read_party_from_conn(conn: &Connection, id: &str) -> Result<Option<Party>, rusqlite::Error> {
    conn.query_row(&format!("{} WHERE id = ?1", PARTY_SELECT), params![id], party_from_row)
        .optional()
}

/// Billing flow helper: returns the existing client with this name or
/// creates one on the fly.
fn resolve_client(conn: &Connection, name: &str) -> Result<Party, rusqlite::Error> {
    let existing = conn
        .query_row(
            &format!("{} WHERE name = ?1 AND role = 'CLIENT'", PARTY_SELECT),
            params![name],
            party_from_row,
        )
        .optional()?;
    if let Some(party) = existing {
        return Ok(party);
    }

    let created = Party {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        role: PartyRole::Client,
        phone: String::new(),
        address: String::new(),
        gstin: None,
        created_at: now_iso(),
    };
    conn.execute(
        r#"INSERT INTO parties (id, name, role, phone, address, gstin, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            created.id,
            created.name,
            created.role.as_str(),
            created.phone,
            created.address,
            created.gstin,
            created.created_at,
        ],
    )?;
    Ok(created)
}

// ---------------------------------------------------------------------------
// Settings commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn get_settings(state: tauri::State<'_, DbState>) -> Result<Settings, String> {
    state.with_read("get_settings", read_settings_from_conn).await
}

#[tauri::command]
async fn update_settings(
    state: tauri::State<'_, DbState>,
    patch: SettingsPatch,
) -> Result<Settings, String> {
    state
        .with_write("update_settings", move |conn| apply_settings_patch(conn, &patch))
        .await
}

// ---------------------------------------------------------------------------
// Medicine commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn create_medicine(
    state: tauri::State<'_, DbState>,
    input: NewMedicine,
) -> Result<Medicine, String> {
    if input.name.trim().is_empty() {
        return Err("medicine name is required".to_string());
    }
    state
        .with_write("create_medicine", move |conn| {
            let id = Uuid::new_v4().to_string();
            let now = now_iso();
            conn.execute(
                r#"INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"#,
                params![
                    id,
                    input.name.trim(),
                    input.batch_number,
                    input.expiry_date,
                    input.price,
                    input.stock,
                    input.hsn,
                    now,
                ],
            )?;
            read_medicine_from_conn(conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
        })
        .await
}

#[tauri::command]
async fn update_medicine(
    state: tauri::State<'_, DbState>,
    id: String,
    patch: MedicinePatch,
) -> Result<Option<Medicine>, String> {
    state
        .with_write("update_medicine", move |conn| {
            let Some(mut existing) = read_medicine_from_conn(conn, &id)? else {
                return Ok(None);
            };

            if let Some(v) = patch.name {
                existing.name = v;
            }
            if let Some(v) = patch.batch_number {
                existing.batch_number = v;
            }
            if let Some(v) = patch.expiry_date {
                existing.expiry_date = v;
            }
            if let Some(v) = patch.price {
                existing.price = v;
            }
            if let Some(v) = patch.stock {
                existing.stock = v;
            }
            if let Some(v) = patch.hsn {
                existing.hsn = v;
            }

            conn.execute(
                r#"UPDATE medicines SET name=?2, batch_number=?3, expiry_date=?4, price=?5, stock=?6, hsn=?7, updated_at=?8
                   WHERE id=?1"#,
                params![
                    id,
                    existing.name,
                    existing.batch_number,
                    existing.expiry_date,
                    existing.price,
                    existing.stock,
                    existing.hsn,
                    now_iso(),
                ],
            )?;
            read_medicine_from_conn(conn, &id)
        })
        .await
}

#[tauri::command]
async fn delete_medicine(state: tauri::State<'_, DbState>, id: String) -> Result<bool, String> {
    state
        .with_write("delete_medicine", move |conn| {
            conn.execute("DELETE FROM medicines WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
}

#[tauri::command]
async fn get_medicine_by_id(
    state: tauri::State<'_, DbState>,
    id: String,
) -> Result<Option<Medicine>, String> {
    state
        .with_read("get_medicine_by_id", move |conn| read_medicine_from_conn(conn, &id))
        .await
}

#[tauri::command]
async fn get_all_medicines(state: tauri::State<'_, DbState>) -> Result<Vec<Medicine>, String> {
    state
        .with_read("get_all_medicines", |conn| {
            collect_medicines(conn, "ORDER BY m.name COLLATE NOCASE ASC", &[])
        })
        .await
}

#[tauri::command]
async fn search_medicines(
    state: tauri::State<'_, DbState>,
    query: String,
) -> Result<Vec<Medicine>, String> {
    state
        .with_read("search_medicines", move |conn| {
            let like = format!("%{}%", query.trim());
            collect_medicines(
                conn,
                "WHERE m.name LIKE ?1 ORDER BY m.name COLLATE NOCASE ASC",
                &[&like],
            )
        })
        .await
}

#[tauri::command]
async fn list_low_stock(
    state: tauri::State<'_, DbState>,
    threshold: i64,
) -> Result<Vec<Medicine>, String> {
    state
        .with_read("list_low_stock", move |conn| {
            collect_medicines(conn, "WHERE m.stock <= ?1 ORDER BY m.stock ASC", &[&threshold])
        })
        .await
}

#[tauri::command]
async fn list_expiring(
    state: tauri::State<'_, DbState>,
    before: String,
) -> Result<Vec<Medicine>, String> {
    state
        .with_read("list_expiring", move |conn| {
            collect_medicines(
                conn,
                "WHERE m.expiry_date IS NOT NULL AND m.expiry_date <= ?1 ORDER BY m.expiry_date ASC",
                &[&before],
            )
        })
        .await
}

// ---------------------------------------------------------------------------
// Party commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn create_party(state: tauri::State<'_, DbState>, input: NewParty) -> Result<Party, String> {
    if input.name.trim().is_empty() {
        return Err("party name is required".to_string());
    }
    state
        .with_write("create_party", move |conn| {
            let created = Party {
                id: Uuid::new_v4().to_string(),
                name: input.name.trim().to_string(),
                role: input.role,
                phone: input.phone,
                address: input.address,
                gstin: input.gstin,
                created_at: now_iso(),
            };
            conn.execute(
                r#"INSERT INTO parties (id, name, role, phone, address, gstin, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                params![
                    created.id,
                    created.name,
                    created.role.as_str(),
                    created.phone,
                    created.address,
                    created.gstin,
                    created.created_at,
                ],
            )?;
            Ok::<_, rusqlite::Error>(created)
        })
        .await
}

#[tauri::command]
async fn update_party(
    state: tauri::State<'_, DbState>,
    id: String,
    patch: serde_json::Value,
) -> Result<Option<Party>, String> {
    state
        .with_write("update_party", move |conn| {
            let Some(mut existing) = read_party_from_conn(conn, &id)? else {
                return Ok(None);
            };

            if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
                existing.name = v.to_string();
            }
            if let Some(v) = patch.get("phone").and_then(|v| v.as_str()) {
                existing.phone = v.to_string();
            }
            if let Some(v) = patch.get("address").and_then(|v| v.as_str()) {
                existing.address = v.to_string();
            }
            if let Some(v) = patch.get("gstin") {
                existing.gstin = v.as_str().map(str::to_string);
            }

            conn.execute(
                "UPDATE parties SET name=?2, phone=?3, address=?4, gstin=?5 WHERE id=?1",
                params![id, existing.name, existing.phone, existing.address, existing.gstin],
            )?;
            Ok::<_, rusqlite::Error>(Some(existing))
        })
        .await
}

/// Fails while any invoice still references the party (enforced by the
/// foreign key).
#[tauri::command]
async fn delete_party(state: tauri::State<'_, DbState>, id: String) -> Result<bool, String> {
    state
        .with_write("delete_party", move |conn| {
            conn.execute("DELETE FROM parties WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
}

#[tauri::command]
async fn get_all_parties(
    state: tauri::State<'_, DbState>,
    role: Option<PartyRole>,
) -> Result<Vec<Party>, String> {
    state
        .with_read("get_all_parties", move |conn| {
            let mut out = Vec::new();
            match role {
                Some(role) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE role = ?1 ORDER BY name COLLATE NOCASE ASC",
                        PARTY_SELECT
                    ))?;
                    let rows = stmt.query_map(params![role.as_str()], party_from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!("{} ORDER BY name COLLATE NOCASE ASC", PARTY_SELECT))?;
                    let rows = stmt.query_map([], party_from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok::<_, rusqlite::Error>(out)
        })
        .await
}

#[tauri::command]
async fn find_or_create_client(
    state: tauri::State<'_, DbState>,
    name: String,
) -> Result<Party, String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err("client name is required".to_string());
    }
    state
        .with_write("find_or_create_client", move |conn| resolve_client(conn, &name))
        .await
}

// ---------------------------------------------------------------------------
// Group commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn upsert_group(
    state: tauri::State<'_, DbState>,
    input: ItemGroup,
) -> Result<ItemGroup, String> {
    if input.hsn_code.trim().is_empty() {
        return Err("HSN code is required".to_string());
    }
    if !input.gst_percentage.is_finite() || input.gst_percentage < 0.0 {
        return Err("GST percentage must be a non-negative number".to_string());
    }
    state
        .with_write("upsert_group", move |conn| {
            conn.execute(
                r#"INSERT INTO item_groups (hsn_code, gst_percentage, measure) VALUES (?1, ?2, ?3)
                   ON CONFLICT(hsn_code) DO UPDATE SET gst_percentage = excluded.gst_percentage,
                                                       measure = excluded.measure"#,
                params![input.hsn_code.trim(), input.gst_percentage, input.measure],
            )?;
            Ok::<_, rusqlite::Error>(ItemGroup {
                hsn_code: input.hsn_code.trim().to_string(),
                gst_percentage: input.gst_percentage,
                measure: input.measure,
            })
        })
        .await
}

#[tauri::command]
async fn delete_group(state: tauri::State<'_, DbState>, hsn_code: String) -> Result<bool, String> {
    state
        .with_write("delete_group", move |conn| {
            conn.execute("DELETE FROM item_groups WHERE hsn_code = ?1", params![hsn_code])?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
}

#[tauri::command]
async fn get_all_groups(state: tauri::State<'_, DbState>) -> Result<Vec<ItemGroup>, String> {
    state
        .with_read("get_all_groups", |conn| {
            let mut stmt = conn.prepare(
                "SELECT hsn_code, gst_percentage, measure FROM item_groups ORDER BY hsn_code ASC",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(ItemGroup {
                    hsn_code: r.get(0)?,
                    gst_percentage: r.get(1)?,
                    measure: r.get(2)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<_, rusqlite::Error>(out)
        })
        .await
}

// ---------------------------------------------------------------------------
// Sales rep commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn create_sales_rep(
    state: tauri::State<'_, DbState>,
    input: NewSalesRep,
) -> Result<SalesRep, String> {
    if input.name.trim().is_empty() {
        return Err("sales rep name is required".to_string());
    }
    state
        .with_write("create_sales_rep", move |conn| {
            let created = SalesRep {
                id: Uuid::new_v4().to_string(),
                name: input.name.trim().to_string(),
                phone: input.phone,
                created_at: now_iso(),
            };
            conn.execute(
                "INSERT INTO sales_reps (id, name, phone, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![created.id, created.name, created.phone, created.created_at],
            )?;
            Ok::<_, rusqlite::Error>(created)
        })
        .await
}

#[tauri::command]
async fn get_all_sales_reps(state: tauri::State<'_, DbState>) -> Result<Vec<SalesRep>, String> {
    state
        .with_read("get_all_sales_reps", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, phone, created_at FROM sales_reps ORDER BY name COLLATE NOCASE ASC",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(SalesRep {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    phone: r.get(2)?,
                    created_at: r.get(3)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<_, rusqlite::Error>(out)
        })
        .await
}

#[tauri::command]
async fn delete_sales_rep(state: tauri::State<'_, DbState>, id: String) -> Result<bool, String> {
    state
        .with_write("delete_sales_rep", move |conn| {
            conn.execute("DELETE FROM rep_targets WHERE rep_id = ?1", params![id])?;
            conn.execute("DELETE FROM sales_reps WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
}

#[tauri::command]
async fn set_rep_target(
    state: tauri::State<'_, DbState>,
    rep_id: String,
    month: String,
    target_amount: f64,
) -> Result<bool, String> {
    if month.len() != 7 || month.as_bytes()[4] != b'-' {
        return Err("month must be formatted YYYY-MM".to_string());
    }
    if !target_amount.is_finite() || target_amount < 0.0 {
        return Err("target must be a non-negative amount".to_string());
    }
    state
        .with_write("set_rep_target", move |conn| {
            conn.execute(
                r#"INSERT INTO rep_targets (rep_id, month, target_amount) VALUES (?1, ?2, ?3)
                   ON CONFLICT(rep_id, month) DO UPDATE SET target_amount = excluded.target_amount"#,
                params![rep_id, month, target_amount],
            )?;
            Ok::<_, rusqlite::Error>(true)
        })
        .await
}

#[tauri::command]
async fn get_rep_performance(
    state: tauri::State<'_, DbState>,
    rep_id: String,
    month: String,
) -> Result<RepPerformance, String> {
    state
        .with_read("get_rep_performance", move |conn| {
            let target_amount: f64 = conn
                .query_row(
                    "SELECT target_amount FROM rep_targets WHERE rep_id = ?1 AND month = ?2",
                    params![rep_id, month],
                    |r| r.get(0),
                )
                .optional()?
                .unwrap_or(0.0);
            let achieved_amount = sales::rep_achieved_amount(conn, &rep_id, &month)?;
            Ok::<_, rusqlite::Error>(RepPerformance {
                rep_id,
                month,
                target_amount,
                achieved_amount,
            })
        })
        .await
}

// ---------------------------------------------------------------------------
// Invoice commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn create_invoice(
    state: tauri::State<'_, DbState>,
    input: sales::NewInvoice,
) -> Result<sales::Invoice, String> {
    let day = today();
    state
        .with_write("create_invoice", move |conn| sales::commit_invoice(conn, &input, day))
        .await
}

#[tauri::command]
async fn get_invoice_by_id(
    state: tauri::State<'_, DbState>,
    id: String,
) -> Result<Option<sales::Invoice>, String> {
    state
        .with_read("get_invoice_by_id", move |conn| sales::read_invoice(conn, &id))
        .await
}

#[tauri::command]
async fn get_all_invoices(state: tauri::State<'_, DbState>) -> Result<Vec<sales::Invoice>, String> {
    state.with_read("get_all_invoices", sales::list_invoices).await
}

#[tauri::command]
async fn list_invoices_range(
    state: tauri::State<'_, DbState>,
    from: String,
    to: String,
) -> Result<Vec<sales::Invoice>, String> {
    state
        .with_read("list_invoices_range", move |conn| {
            sales::list_invoices_range(conn, &from, &to)
        })
        .await
}

#[tauri::command]
async fn preview_invoice_number(state: tauri::State<'_, DbState>) -> Result<String, String> {
    // Must match the atomic assignment logic inside the commit transaction.
    let day = today();
    state
        .with_read("preview_invoice_number", move |conn| {
            sales::next_invoice_number(conn, day)
        })
        .await
}

// ---------------------------------------------------------------------------
// Document export commands
// ---------------------------------------------------------------------------

fn invoice_doc_from_records(
    invoice: &sales::Invoice,
    client: Option<&Party>,
    settings: &Settings,
) -> pdf::InvoiceDoc {
    pdf::InvoiceDoc {
        invoice_number: invoice.invoice_number.clone(),
        client: pdf::BillTo {
            name: client
                .map(|c| c.name.clone())
                .unwrap_or_else(|| invoice.client_name.clone()),
            address: client.map(|c| c.address.clone()).unwrap_or_default(),
            phone: client.map(|c| c.phone.clone()).unwrap_or_default(),
            gstin: client.and_then(|c| c.gstin.clone()),
        },
        payment_mode: invoice.payment_mode.as_str().to_string(),
        items: invoice
            .items
            .iter()
            .map(|line| pdf::BillItem {
                name: line.medicine_name.clone(),
                hsn: line.hsn.clone(),
                batch_number: if line.batch_number.is_empty() {
                    None
                } else {
                    Some(line.batch_number.clone())
                },
                quantity: line.quantity,
                price: line.unit_price,
            })
            .collect(),
        totals: pdf::DocTotals {
            subtotal: invoice.total_amount,
            tax: invoice.tax,
            final_amount: invoice.final_amount,
        },
        company: pdf::CompanyInfo {
            company_name: settings.company_name.clone(),
            address: settings.address.clone(),
            footer_text: if settings.footer_text.trim().is_empty() {
                None
            } else {
                Some(settings.footer_text.clone())
            },
        },
    }
}

fn write_binary_file(path: &std::path::Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    std::fs::write(path, bytes).map_err(|e| e.to_string())
}

/// Renders a persisted invoice to the path the front end picked through the
/// save dialog. The renderer never opens dialogs itself.
#[tauri::command]
async fn export_invoice_pdf(
    state: tauri::State<'_, DbState>,
    invoice_id: String,
    output_path: String,
) -> Result<String, String> {
    let wanted = invoice_id.clone();
    let (invoice, client, settings) = state
        .with_read("export_invoice_pdf", move |conn| {
            let invoice = sales::read_invoice(conn, &invoice_id)?;
            let client = match &invoice {
                Some(inv) => read_party_from_conn(conn, &inv.client_id)?,
                None => None,
            };
            let settings = read_settings_from_conn(conn)?;
            Ok::<_, rusqlite::Error>((invoice, client, settings))
        })
        .await?;

    let Some(invoice) = invoice else {
        return Err(format!("invoice not found: {}", wanted));
    };

    let doc = invoice_doc_from_records(&invoice, client.as_ref(), &settings);
    let bytes = pdf::render_invoice(&doc, today()).map_err(|e| e.to_string())?;
    write_binary_file(std::path::Path::new(&output_path), &bytes)?;
    Ok(output_path)
}

/// Quotations are not persisted; the front end sends the full payload.
#[tauri::command]
async fn export_quotation_pdf(
    state: tauri::State<'_, DbState>,
    payload: pdf::QuotationDoc,
    output_path: String,
) -> Result<String, String> {
    let settings = state.with_read("export_quotation_pdf", read_settings_from_conn).await?;
    let payload = pdf::QuotationDoc {
        company: pdf::CompanyInfo {
            company_name: settings.company_name,
            address: settings.address,
            footer_text: if settings.footer_text.trim().is_empty() {
                None
            } else {
                Some(settings.footer_text)
            },
        },
        ..payload
    };

    let bytes = pdf::render_quotation(&payload, today()).map_err(|e| e.to_string())?;
    write_binary_file(std::path::Path::new(&output_path), &bytes)?;
    Ok(output_path)
}

// ---------------------------------------------------------------------------
// CSV export commands
// ---------------------------------------------------------------------------

fn csv_escape_field(input: &str) -> String {
    let needs_quotes =
        input.contains(',') || input.contains('"') || input.contains('\n') || input.contains('\r');
    if !needs_quotes {
        return input.to_string();
    }
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn csv_join_row(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_escape_field(f));
    }
    out
}

fn format_money_csv(v: f64) -> String {
    // Raw decimal, dot separator, deterministic 2 decimals.
    format!("{:.2}", v)
}

fn write_text_file(path: &std::path::Path, contents: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    std::fs::write(path, contents).map_err(|e| e.to_string())
}

#[tauri::command]
async fn export_invoices_csv(
    state: tauri::State<'_, DbState>,
    from: String,
    to: String,
    output_path: String,
) -> Result<String, String> {
    let invoices = state
        .with_read("export_invoices_csv", move |conn| {
            sales::list_invoices_range(conn, &from, &to)
        })
        .await?;

    let header = [
        "invoiceNumber",
        "date",
        "clientName",
        "status",
        "paymentMode",
        "subtotal",
        "discount",
        "tax",
        "finalAmount",
        "medicineName",
        "hsn",
        "batchNumber",
        "quantity",
        "freeQuantity",
        "unitPrice",
        "ptr",
        "itemTotal",
    ];

    let mut lines: Vec<String> = Vec::new();
    lines.push(csv_join_row(&header.iter().map(|s| s.to_string()).collect::<Vec<_>>()));

    for inv in invoices {
        let date = inv.created_at.chars().take(10).collect::<String>();
        for item in inv.items.iter() {
            let row = vec![
                inv.invoice_number.clone(),
                date.clone(),
                inv.client_name.clone(),
                inv.status.as_str().to_string(),
                inv.payment_mode.as_str().to_string(),
                format_money_csv(inv.total_amount),
                format_money_csv(inv.discount),
                format_money_csv(inv.tax),
                format_money_csv(inv.final_amount),
                item.medicine_name.clone(),
                item.hsn.clone().unwrap_or_default(),
                item.batch_number.clone(),
                item.quantity.to_string(),
                item.free_quantity.to_string(),
                format_money_csv(item.unit_price),
                format_money_csv(item.ptr),
                format_money_csv(item.total_price),
            ];
            lines.push(csv_join_row(&row));
        }
    }

    let csv = lines.join("\r\n") + "\r\n";
    let path = std::path::PathBuf::from(&output_path);
    write_text_file(&path, &csv)?;
    Ok(output_path)
}

#[tauri::command]
async fn export_stock_csv(
    state: tauri::State<'_, DbState>,
    output_path: String,
) -> Result<String, String> {
    let medicines = state
        .with_read("export_stock_csv", |conn| {
            collect_medicines(conn, "ORDER BY m.name COLLATE NOCASE ASC", &[])
        })
        .await?;

    let header = ["name", "batchNumber", "expiryDate", "hsn", "gstPercentage", "price", "stock"];

    let mut lines: Vec<String> = Vec::new();
    lines.push(csv_join_row(&header.iter().map(|s| s.to_string()).collect::<Vec<_>>()));

    for m in medicines {
        let row = vec![
            m.name,
            m.batch_number,
            m.expiry_date.unwrap_or_default(),
            m.hsn.unwrap_or_default(),
            m.gst_percentage.map(|g| format!("{}", g)).unwrap_or_default(),
            format_money_csv(m.price),
            m.stock.to_string(),
        ];
        lines.push(csv_join_row(&row));
    }

    let csv = lines.join("\r\n") + "\r\n";
    let path = std::path::PathBuf::from(&output_path);
    write_text_file(&path, &csv)?;
    Ok(output_path)
}

#[tauri::command]
fn quit_app(app: tauri::AppHandle) {
    app.exit(0);
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            let handle = app.handle();
            let db = DbState::new(&handle)?;
            app.manage(db);
            Ok(())
        })
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            quit_app,
            get_settings,
            update_settings,
            create_medicine,
            update_medicine,
            delete_medicine,
            get_medicine_by_id,
            get_all_medicines,
            search_medicines,
            list_low_stock,
            list_expiring,
            create_party,
            update_party,
            delete_party,
            get_all_parties,
            find_or_create_client,
            upsert_group,
            delete_group,
            get_all_groups,
            create_sales_rep,
            get_all_sales_reps,
            delete_sales_rep,
            set_rep_target,
            get_rep_performance,
            create_invoice,
            get_invoice_by_id,
            get_all_invoices,
            list_invoices_range,
            preview_invoice_number,
            export_invoice_pdf,
            export_quotation_pdf,
            export_invoices_csv,
            export_stock_csv
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite(&conn).unwrap();
        init_schema(&conn).unwrap();
        apply_migrations(&conn).unwrap();
        ensure_settings_row(&conn).unwrap();
        conn
    }

    #[test]
    fn csv_escaping_quotes_only_when_needed() {
        assert_eq!(csv_escape_field("plain"), "plain");
        assert_eq!(csv_escape_field("a,b"), "\"a,b\"");
        assert_eq!(csv_escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape_field("line\nbreak"), "\"line\nbreak\"");
        assert_eq!(
            csv_join_row(&["a".to_string(), "b,c".to_string()]),
            "a,\"b,c\""
        );
    }

    #[test]
    fn settings_row_exists_and_patches_apply() {
        let conn = test_conn();
        let initial = read_settings_from_conn(&conn).unwrap();
        assert_eq!(initial.company_name, "");

        let patched = apply_settings_patch(
            &conn,
            &SettingsPatch {
                company_name: Some("Sharma Medicos".to_string()),
                address: Some("12 MG Road\nPune 411001".to_string()),
                phone: None,
                gstin: Some("27ABCDE1234F1Z5".to_string()),
                footer_text: None,
            },
        )
        .unwrap();
        assert_eq!(patched.company_name, "Sharma Medicos");
        assert_eq!(patched.footer_text, "");

        let reread = read_settings_from_conn(&conn).unwrap();
        assert_eq!(reread.address, "12 MG Road\nPune 411001");
        assert_eq!(reread.gstin, "27ABCDE1234F1Z5");
    }

    #[test]
    fn group_link_supplies_medicine_gst_rate() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO item_groups (hsn_code, gst_percentage, measure) VALUES ('3004', 5.0, 'strip')",
            [],
        )
        .unwrap();
        let now = now_iso();
        conn.execute(
            "INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
             VALUES ('m1', 'Paracetamol', 'B-1', NULL, 10.0, 5, '3004', ?1, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
             VALUES ('m2', 'Gauze Roll', 'B-2', NULL, 30.0, 5, NULL, ?1, ?1)",
            params![now],
        )
        .unwrap();

        let linked = read_medicine_from_conn(&conn, "m1").unwrap().unwrap();
        assert_eq!(linked.gst_percentage, Some(5.0));

        let unlinked = read_medicine_from_conn(&conn, "m2").unwrap().unwrap();
        assert_eq!(unlinked.gst_percentage, None);
    }

    #[test]
    fn resolve_client_reuses_existing_names() {
        let conn = test_conn();
        let first = resolve_client(&conn, "City Clinic").unwrap();
        let second = resolve_client(&conn, "City Clinic").unwrap();
        assert_eq!(first.id, second.id);

        let other = resolve_client(&conn, "Other Clinic").unwrap();
        assert_ne!(first.id, other.id);

        let total: i64 = conn
            .query_row("SELECT COUNT(1) FROM parties", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn committed_invoice_renders_to_a_document() {
        let mut conn = test_conn();
        apply_settings_patch(
            &conn,
            &SettingsPatch {
                company_name: Some("Sharma Medicos".to_string()),
                address: Some("12 MG Road\nPune 411001".to_string()),
                phone: None,
                gstin: None,
                footer_text: Some("Get well soon!".to_string()),
            },
        )
        .unwrap();
        let client = resolve_client(&conn, "City Clinic").unwrap();
        let now = now_iso();
        conn.execute(
            "INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
             VALUES ('m1', 'Paracetamol 500', 'B-1', NULL, 10.0, 50, '3004', ?1, ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO medicines (id, name, batch_number, expiry_date, price, stock, hsn, created_at, updated_at)
             VALUES ('m2', 'Cough Syrup', 'B-2', NULL, 25.0, 20, '3004', ?1, ?1)",
            params![now],
        )
        .unwrap();

        let input = sales::NewInvoice {
            client_id: client.id.clone(),
            sales_rep_id: None,
            payment_mode: sales::PaymentMode::Cash,
            status: None,
            discount: 0.0,
            tax: 2.75,
            items: vec![
                sales::NewInvoiceLine {
                    medicine_id: "m1".to_string(),
                    quantity: 3,
                    free_quantity: 0,
                    unit_price: 10.0,
                    ptr: 0.0,
                },
                sales::NewInvoiceLine {
                    medicine_id: "m2".to_string(),
                    quantity: 1,
                    free_quantity: 0,
                    unit_price: 25.0,
                    ptr: 0.0,
                },
            ],
        };
        let day = time::Date::from_calendar_date(2026, time::Month::March, 15).unwrap();
        let invoice = sales::commit_invoice(&mut conn, &input, day).unwrap();

        let settings = read_settings_from_conn(&conn).unwrap();
        let client_row = read_party_from_conn(&conn, &invoice.client_id).unwrap();
        let doc = invoice_doc_from_records(&invoice, client_row.as_ref(), &settings);

        assert_eq!(doc.invoice_number, "INV-20260315-001");
        assert_eq!(doc.client.name, "City Clinic");
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.totals.subtotal, 55.0);
        assert_eq!(doc.totals.final_amount, 58.0);
        assert_eq!(pdf::format_rupees(doc.totals.subtotal), "₹55.00");
        assert_eq!(pdf::format_rupees(doc.totals.tax / 2.0), "₹1.38");
        assert_eq!(pdf::format_rupees(doc.totals.final_amount), "₹58.00");

        let bytes = pdf::render_invoice(&doc, day).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn referenced_party_cannot_be_deleted() {
        let conn = test_conn();
        let client = resolve_client(&conn, "City Clinic").unwrap();
        conn.execute(
            r#"INSERT INTO invoices (id, invoice_number, client_id, sales_rep_id,
                total_amount, discount, tax, final_amount, payment_mode, status, created_at)
               VALUES ('i1', 'INV-20260315-001', ?1, NULL, 10, 0, 0, 10, 'CASH', 'COMPLETED', ?2)"#,
            params![client.id, now_iso()],
        )
        .unwrap();

        let err = conn.execute("DELETE FROM parties WHERE id = ?1", params![client.id]);
        assert!(err.is_err());
    }
}
