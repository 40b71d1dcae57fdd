fn setup_environment() {
    // A host Python install must not leak into the yt-dlp child processes.
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");
}

fn main() -> anyhow::Result<()> {
    setup_environment();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(vidgrab_lib::run())
}
