mod demo;

#[tokio::main]
async fn main() {
    marks_cli::run(demo::registry()).await;
}
