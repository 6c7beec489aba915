use clap::Parser;
use inkroom_client::{
    AnalysisClient, AnalysisError, ClientConfig, ConfigError, ConnectionError, HttpHistoryStore, PlatformWebSocket,
    Session, SessionError, SessionStatus,
};
use inkroom_core::Shape;
use inkroom_render::{CapturedImage, RendererError, encode_png};
use kurbo::Rect;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing token; pass --token or set INKROOM_TOKEN")]
    MissingToken,
    #[error("invalid region {0:?}; expected X,Y,WIDTH,HEIGHT")]
    InvalidRegion(String),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("room {room} never became ready ({status:?})")]
    NotReady { room: String, status: SessionStatus },
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Render(#[from] RendererError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

#[derive(Parser, Debug)]
#[command(name = "inkroom", about = "Headless InkRoom whiteboard client")]
struct Cli {
    /// Room to join.
    #[arg(long, env = "INKROOM_ROOM")]
    room: String,

    /// Bearer token presented to the relay.
    #[arg(long, env = "INKROOM_TOKEN")]
    token: Option<String>,

    /// How long to stay in the room receiving peer shapes.
    #[arg(long, default_value_t = 5)]
    listen_secs: u64,

    /// Shape to commit once joined, as JSON (e.g. `{"type":"rect","x":0,"y":0,"width":10,"height":10}`).
    #[arg(long)]
    draw: Option<String>,

    /// Write the final board to this PNG file.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Capture `X,Y,WIDTH,HEIGHT` and send it for analysis.
    #[arg(long)]
    analyze: Option<String>,

    /// Relay WebSocket endpoint [env: INKROOM_RELAY_URL].
    #[arg(long)]
    relay_url: Option<String>,

    /// History service base URL [env: INKROOM_API_URL].
    #[arg(long)]
    api_url: Option<String>,

    /// Image analysis endpoint [env: INKROOM_ANALYSIS_URL].
    #[arg(long)]
    analysis_url: Option<String>,

    /// Analysis request timeout in seconds [env: INKROOM_ANALYSIS_TIMEOUT_SECS].
    #[arg(long)]
    analysis_timeout_secs: Option<u64>,

    /// Surface size as `WIDTHxHEIGHT` [env: INKROOM_VIEWPORT].
    #[arg(long)]
    viewport: Option<String>,
}

impl Cli {
    /// Client config from flags, falling back to the environment.
    fn config(&self) -> Result<ClientConfig, ConfigError> {
        ClientConfig::from_lookup(|key| self.config_flag(key).or_else(|| std::env::var(key).ok()))
    }

    fn config_flag(&self, key: &str) -> Option<String> {
        match key {
            "INKROOM_RELAY_URL" => self.relay_url.clone(),
            "INKROOM_API_URL" => self.api_url.clone(),
            "INKROOM_ANALYSIS_URL" => self.analysis_url.clone(),
            "INKROOM_ANALYSIS_TIMEOUT_SECS" => self.analysis_timeout_secs.map(|secs| secs.to_string()),
            "INKROOM_VIEWPORT" => self.viewport.clone(),
            _ => None,
        }
    }
}

pub fn run() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {}", CliError::Runtime(e));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_session(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_session(cli: Cli) -> Result<(), CliError> {
    let config = cli.config()?;
    let token = cli.token.filter(|t| !t.is_empty()).ok_or(CliError::MissingToken)?;
    let draw = cli.draw.as_deref().map(parse_shape).transpose()?;
    let analyze = cli.analyze.as_deref().map(parse_region).transpose()?;

    let connection = PlatformWebSocket::connect_to(&config.relay_endpoint(&token))?;
    let mut session = Session::open(cli.room.as_str(), connection, config.viewport);
    let captured: Rc<RefCell<Option<CapturedImage>>> = Rc::default();
    let sink = captured.clone();
    session.set_capture_callback(move |image| *sink.borrow_mut() = Some(image.clone()));

    let store = HttpHistoryStore::new(config.api_url.clone());
    if let Err(e) = session.load_history(&store).await {
        log::error!("Could not load history: {}", e);
    }

    let deadline = Instant::now() + Duration::from_secs(cli.listen_secs);
    let mut draw = draw;
    while Instant::now() < deadline {
        session.pump();
        match session.status() {
            SessionStatus::Disconnected | SessionStatus::LoadFailed => break,
            SessionStatus::Ready => {
                if let Some(shape) = draw.take() {
                    session.apply_local_commit(shape)?;
                }
            }
            _ => {}
        }
        sleep(PUMP_INTERVAL).await;
    }

    let status = session.status();
    if status != SessionStatus::Ready {
        return Err(CliError::NotReady {
            room: cli.room,
            status,
        });
    }
    println!("{} shapes in room {}", session.shapes().len(), session.room_id());

    if let Some(path) = &cli.out {
        write_png(&session, path)?;
        println!("wrote {}", path.display());
    }

    if let Some(region) = analyze {
        session.capture_region(region)?;
        let image = captured.borrow_mut().take();
        if let Some(image) = image {
            let client = AnalysisClient::new(config.analysis_url.clone(), config.analysis_timeout)?;
            let text = client.analyze(&image).await?;
            let note = session.annotate(image.region, text);
            println!("{}", note.text);
        }
    }

    session.close();
    Ok(())
}

fn write_png<C: inkroom_client::Connection>(session: &Session<C>, path: &Path) -> Result<(), CliError> {
    let renderer = session.renderer();
    let png = encode_png(renderer.image().as_raw(), renderer.width(), renderer.height())?;
    std::fs::write(path, png).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse `X,Y,WIDTH,HEIGHT` into a region.
fn parse_region(raw: &str) -> Result<Rect, CliError> {
    let invalid = || CliError::InvalidRegion(raw.to_string());
    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;
    let [x, y, w, h] = values[..] else {
        return Err(invalid());
    };
    Ok(Rect::new(x, y, x + w, y + h))
}

fn parse_shape(raw: &str) -> Result<Shape, CliError> {
    let shape: Shape = serde_json::from_str(raw).map_err(|e| CliError::InvalidShape(e.to_string()))?;
    shape.validate().map_err(|e| CliError::InvalidShape(e.to_string()))?;
    Ok(shape)
}
