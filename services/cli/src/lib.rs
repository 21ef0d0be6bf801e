mod cli;
mod commands;
mod infra;

use outreach::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
