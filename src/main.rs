fn main() -> anyhow::Result<()> {
    valvescan_lib::run()
}
