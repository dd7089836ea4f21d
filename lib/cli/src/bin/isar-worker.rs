use isar_worker_cli::cli::isar_worker_main;

fn main() {
    isar_worker_main();
}
