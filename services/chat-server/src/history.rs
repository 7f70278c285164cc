//! Chat history log: a durable append-only record of public/room messages.

use sqlx::SqlitePool;

pub async fn append(
    pool: &SqlitePool,
    room: &str,
    sender: &str,
    message: &str,
    timestamp: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO chat_history (room, sender, message, timestamp) VALUES (?, ?, ?, ?)")
        .bind(room)
        .bind(sender)
        .bind(message)
        .bind(timestamp)
        .execute(pool)
        .await?;
    Ok(())
}
