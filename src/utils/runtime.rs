use anyhow::Result;

/// Every piece of session state lives on one thread; the OS hooks hand their events over through
/// channels, so a current-thread runtime is all the application needs.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
