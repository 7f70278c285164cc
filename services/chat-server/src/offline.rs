//! Offline message queue: private messages held for a recipient who wasn't
//! online at send time, delivered the next time they log in.

use sqlx::SqlitePool;

pub struct PendingMessage {
    pub id: i64,
    pub sender: String,
    pub message: String,
    pub timestamp: String,
}

pub async fn save(
    pool: &SqlitePool,
    sender: &str,
    recipient: &str,
    message: &str,
    timestamp: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO offline_messages (sender, recipient, message, timestamp) VALUES (?, ?, ?, ?)",
    )
    .bind(sender)
    .bind(recipient)
    .bind(message)
    .bind(timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

/// Undelivered messages for `recipient`, oldest first.
pub async fn pending_for(
    pool: &SqlitePool,
    recipient: &str,
) -> Result<Vec<PendingMessage>, sqlx::Error> {
    let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
        "SELECT id, sender, message, timestamp FROM offline_messages \
         WHERE recipient = ? AND delivered = 0 ORDER BY id",
    )
    .bind(recipient)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, sender, message, timestamp)| PendingMessage {
            id,
            sender,
            message,
            timestamp,
        })
        .collect())
}

pub async fn mark_delivered(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE offline_messages SET delivered = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
