fn main() -> anyhow::Result<()> {
    quill_tui::cli::run()
}
