//! Invoice repository: persists extraction results into `invoices`,
//! `invoice_lines` and `other_documents`.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::job::ResultRef;
use crate::pipeline::{InvoiceData, LineItem, PersistError, PersistSource, ResultPersister};

const UNKNOWN_CURRENCY: &str = "XXX";

/// A stored invoice with its line items.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredInvoice {
    pub id: i64,
    pub provider: String,
    pub date: String,
    pub invoice_number: String,
    pub total_without_vat: Option<f64>,
    pub total_with_vat: Option<f64>,
    pub currency: String,
    pub original_filename: Option<String>,
    pub lines: Vec<LineItem>,
}

/// SQLite-backed [`ResultPersister`].
#[derive(Clone)]
pub struct InvoiceStore {
    db: Database,
}

/// ISO-4217-shaped code or `XXX`.
fn normalize_currency(currency: Option<&str>) -> String {
    let code: String = currency
        .unwrap_or("")
        .trim()
        .chars()
        .take(3)
        .collect::<String>()
        .to_uppercase();
    if code.chars().count() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        code
    } else {
        UNKNOWN_CURRENCY.to_string()
    }
}

fn truncate(value: Option<&str>, max_chars: usize) -> String {
    value.unwrap_or("").chars().take(max_chars).collect()
}

impl InvoiceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find_invoice(&self, id: i64) -> Result<Option<StoredInvoice>, DatabaseError> {
        self.db.with_conn(|conn| {
            let invoice = conn
                .query_row(
                    "SELECT id, provider, date, invoice_number, total_without_vat, total_with_vat,
                            currency, original_filename
                     FROM invoices WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(StoredInvoice {
                            id: row.get(0)?,
                            provider: row.get(1)?,
                            date: row.get(2)?,
                            invoice_number: row.get(3)?,
                            total_without_vat: row.get(4)?,
                            total_with_vat: row.get(5)?,
                            currency: row.get(6)?,
                            original_filename: row.get(7)?,
                            lines: Vec::new(),
                        })
                    },
                )
                .optional()?;

            let Some(mut invoice) = invoice else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT designation, quantity, unit_price, total_ht
                 FROM invoice_lines WHERE invoice_id = ?1 ORDER BY id ASC",
            )?;
            invoice.lines = stmt
                .query_map(params![id], |row| {
                    Ok(LineItem {
                        designation: row.get(0)?,
                        quantity: row.get(1)?,
                        unit_price: row.get(2)?,
                        total_ht: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(invoice))
        })
    }

    pub fn count_documents(&self) -> Result<(u64, u64), DatabaseError> {
        self.db.with_conn(|conn| {
            let invoices: u64 =
                conn.query_row("SELECT COUNT(*) FROM invoices", [], |r| r.get(0))?;
            let others: u64 =
                conn.query_row("SELECT COUNT(*) FROM other_documents", [], |r| r.get(0))?;
            Ok((invoices, others))
        })
    }
}

impl ResultPersister for InvoiceStore {
    fn persist(
        &self,
        data: &InvoiceData,
        raw_response: &str,
        source: &PersistSource,
    ) -> Result<ResultRef, PersistError> {
        let now = Utc::now().to_rfc3339();
        let filename = truncate(Some(&source.original_filename), 255);

        if !data.is_invoice {
            let id = self.db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO other_documents (original_filename, raw_text, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![filename, raw_response, now],
                )?;
                Ok(conn.last_insert_rowid())
            })?;
            log::info!("Saved job {} as other document {}", source.job_id, id);
            return Ok(ResultRef::Document(id));
        }

        let raw_json = serde_json::to_string(data)?;
        let currency = normalize_currency(data.currency.as_deref());

        let id = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO invoices (provider, date, invoice_number, total_without_vat,
                     total_with_vat, currency, original_filename, raw_json, raw_response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    truncate(data.provider.as_deref(), 255),
                    truncate(data.date.as_deref(), 50),
                    truncate(data.invoice_number.as_deref(), 100),
                    data.total_ht,
                    data.total_ttc,
                    currency,
                    filename,
                    raw_json,
                    raw_response,
                    now,
                ],
            )?;
            let invoice_id = tx.last_insert_rowid();

            for item in &data.line_items {
                tx.execute(
                    "INSERT INTO invoice_lines (invoice_id, designation, quantity, unit_price, total_ht)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        invoice_id,
                        truncate(item.designation.as_deref(), 500),
                        item.quantity,
                        item.unit_price,
                        item.total_ht,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(invoice_id)
        })?;

        log::info!(
            "Saved job {} as invoice {} ({} lines)",
            source.job_id,
            id,
            data.line_items.len()
        );
        Ok(ResultRef::Invoice(id))
    }

    fn discard(&self, result: &ResultRef) -> Result<(), PersistError> {
        let deleted = match *result {
            ResultRef::Invoice(id) => self.db.with_conn(|conn| {
                Ok(conn.execute("DELETE FROM invoices WHERE id = ?1", params![id])?)
            })?,
            ResultRef::Document(id) => self.db.with_conn(|conn| {
                Ok(conn.execute("DELETE FROM other_documents WHERE id = ?1", params![id])?)
            })?,
            ResultRef::Unsaved => return Err(PersistError::NotDiscardable(*result)),
        };
        log::info!("Discarded {:?} ({} rows)", result, deleted);
        Ok(())
    }
}
