//! Data access for the `contacts` table.
//!
//! Every function takes the transaction it runs in, so the unit of work is
//! always visible at the call site and nothing here can autocommit. Open one
//! with [`Database::begin`](super::Database::begin).

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use std::collections::BTreeSet;

use super::Result;
use crate::models::{Contact, LinkPrecedence};

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at, deleted_at";

/// Fixed-width UTC form so that text ordering in SQL is chronological.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
    let id: i64 = row.get("id")?;
    let linked_id: Option<i64> = row.get("linked_id")?;
    let precedence: String = row.get("link_precedence")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;

    let link_precedence = LinkPrecedence::from_parts(&precedence, linked_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("contact {id}: '{precedence}' with linked_id {linked_id:?}").into(),
        )
    })?;

    Ok(Contact {
        id,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        link_precedence,
        created_at: parse_timestamp(5, &created_at)?,
        updated_at: parse_timestamp(6, &updated_at)?,
        deleted_at: deleted_at
            .as_deref()
            .map(|s| parse_timestamp(7, s))
            .transpose()?,
    })
}

/// Contacts whose email equals `email` or whose phone equals `phone`,
/// oldest first. An absent input matches nothing.
pub fn find_by_email_or_phone(
    tx: &Transaction<'_>,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<Vec<Contact>> {
    if email.is_none() && phone.is_none() {
        return Ok(vec![]);
    }

    // `col = NULL` is never true, so a missing input cannot match a NULL column
    let sql = format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts
         WHERE email = ?1 OR phone_number = ?2
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = tx.prepare(&sql)?;
    let contacts = stmt
        .query_map(params![email, phone], row_to_contact)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(contacts)
}

/// Every contact whose id is in `ids` or whose `linked_id` is in `ids`,
/// oldest first.
pub fn find_by_ids_or_linked_ids(tx: &Transaction<'_>, ids: &[i64]) -> Result<Vec<Contact>> {
    let ids: BTreeSet<i64> = ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = (1..=ids.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts
         WHERE id IN ({placeholders}) OR linked_id IN ({placeholders})
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = tx.prepare(&sql)?;
    let contacts = stmt
        .query_map(params_from_iter(ids.iter()), row_to_contact)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(contacts)
}

/// The primary itself plus every contact linked directly to it, oldest first.
pub fn find_cluster(tx: &Transaction<'_>, primary_id: i64) -> Result<Vec<Contact>> {
    let sql = format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts
         WHERE id = ?1 OR linked_id = ?1
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = tx.prepare(&sql)?;
    let contacts = stmt
        .query_map([primary_id], row_to_contact)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(contacts)
}

pub fn get_contact(tx: &Transaction<'_>, id: i64) -> Result<Option<Contact>> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?");
    let contact = tx
        .query_row(&sql, [id], row_to_contact)
        .optional()?;
    Ok(contact)
}

pub fn count_contacts(tx: &Transaction<'_>) -> Result<u32> {
    let count: u32 = tx.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
    Ok(count)
}

/// Insert a contact. The store assigns the id and both timestamps.
pub fn create_contact(
    tx: &Transaction<'_>,
    email: Option<&str>,
    phone: Option<&str>,
    link_precedence: LinkPrecedence,
) -> Result<Contact> {
    let now = Utc::now();
    let stamp = format_timestamp(now);

    tx.execute(
        "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            email,
            phone,
            link_precedence.linked_id(),
            link_precedence.as_str(),
            stamp,
            stamp,
        ],
    )?;

    // Stored precision is microseconds; match it so a later read compares equal
    let stored_at = parse_timestamp(5, &stamp)?;
    Ok(Contact {
        id: tx.last_insert_rowid(),
        email: email.map(String::from),
        phone_number: phone.map(String::from),
        link_precedence,
        created_at: stored_at,
        updated_at: stored_at,
        deleted_at: None,
    })
}

/// Change a contact's precedence and link. Nothing else is touched except
/// `updated_at`. Returns false when no such contact exists.
pub fn update_link(tx: &Transaction<'_>, id: i64, link_precedence: LinkPrecedence) -> Result<bool> {
    let rows = tx.execute(
        "UPDATE contacts SET link_precedence = ?, linked_id = ?, updated_at = ? WHERE id = ?",
        params![
            link_precedence.as_str(),
            link_precedence.linked_id(),
            format_timestamp(Utc::now()),
            id,
        ],
    )?;
    Ok(rows > 0)
}

/// Point every secondary linked to `from` at `to`. Returns the number moved.
pub fn relink_secondaries(tx: &Transaction<'_>, from: i64, to: i64) -> Result<usize> {
    let rows = tx.execute(
        "UPDATE contacts SET linked_id = ?, updated_at = ?
         WHERE linked_id = ? AND link_precedence = 'secondary'",
        params![to, format_timestamp(Utc::now()), from],
    )?;
    Ok(rows)
}
