//! Custom setup of rocket.rs for the pathframe dashboard

use crate::{
    frame::PathFrame,
    schedule::compute_next_run,
    tracker::HistoryEntry,
    utils::{local_time, next_run_label},
};
use anyhow::Context;
use chrono::{DateTime, Local};
use log::{info, warn};
use rocket::{
    config::Shutdown as ShutdownConfig,
    response::status::NotFound,
    serde::{json::Json, Serialize},
    Shutdown, State,
};
use rocket_dyn_templates::{context, Template};
use std::{fs, net::IpAddr, path::Path, sync::Arc};

const TEMPLATES_DIR: &str = "./templates";
const HISTORY_SHOWN: usize = 20;

// the templates are written once, an edited copy is left alone
fn write_templates() -> anyhow::Result<()> {
    let dir = Path::new(TEMPLATES_DIR);
    if dir.exists() {
        return Ok(());
    }

    info!("Generating templates directory content");
    fs::create_dir_all(dir).context("could not create templates directory")?;
    for (file, content) in [
        ("base.html.tera", BASE_TEMPLATE),
        ("index.html.tera", INDEX_TEMPLATE),
        ("styles.css", STYLES),
    ] {
        fs::write(dir.join(file), content).with_context(|| format!("could not write {file}"))?;
    }
    Ok(())
}

/// Called by [`PathFrame::start_web_server`], blocks until the server stops.
///
/// It provides the dashboard page and a read-only JSON API. The only
/// routes with effects are the manual trigger and the shutdown hook.
///
/// Upon first start it generates a templates folder inside the current directory with:
/// - base.html.tera
/// - index.html.tera
/// - styles.css
pub fn web_server(frame: Arc<PathFrame>) -> anyhow::Result<()> {
    write_templates()?;

    let address: IpAddr = frame
        .settings
        .ip
        .parse()
        .with_context(|| format!("invalid webserver ip '{}'", frame.settings.ip))?;

    let config = rocket::Config {
        port: frame.settings.port,
        address,
        shutdown: ShutdownConfig {
            ctrlc: false,
            ..Default::default()
        },
        cli_colors: false,
        ..rocket::Config::release_default()
    };

    let rocket = rocket::custom(&config)
        .mount(
            "/",
            routes![
                styles,
                home,
                api_paths,
                api_running,
                api_history,
                trigger,
                shutdown
            ],
        )
        .attach(Template::fairing())
        .manage(frame.clone());

    let (tx, _) = frame.web_server_channels.clone();
    let tokio_runtime = rocket::tokio::runtime::Runtime::new().context("tokio runtime error")?;

    tokio_runtime.block_on(async move {
        // formatting marks a rocket error as handled
        let rocket = rocket
            .ignite()
            .await
            .map_err(|error| anyhow::anyhow!("rocket ignite error - {error}"))?;
        let _ = tx.send(rocket.shutdown());

        info!("PathFrame running at {}", frame.settings.base_url());

        rocket
            .launch()
            .await
            .map_err(|error| anyhow::anyhow!("rocket launch error - {error}"))?;
        Ok::<(), anyhow::Error>(())
    })
}

/// One row of the dashboard, the next run label is computed per request.
#[derive(Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct PathView {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub active: bool,
    pub schedule: String,
    pub running: bool,
    pub last_run: Option<String>,
    pub next_run: Option<DateTime<Local>>,
    pub next_run_label: Option<String>,
    pub schedule_error: Option<String>,
}

pub fn path_views(frame: &PathFrame, now: DateTime<Local>) -> Vec<PathView> {
    let running = frame.in_progress();

    frame
        .paths()
        .into_iter()
        .map(|path| {
            let (next_run, schedule_error) = match compute_next_run(&path, &now) {
                Ok(next) => (next, None),
                Err(error) => (None, Some(error.to_string())),
            };
            let schedule = match path.recurrence() {
                Ok(Some(recurrence)) => recurrence.to_string(),
                Ok(None) => "Not scheduled".to_string(),
                Err(_) => "Invalid".to_string(),
            };

            PathView {
                running: running.contains(&path.id),
                next_run_label: next_run.as_ref().map(|next| next_run_label(next, &now)),
                last_run: path
                    .last_run
                    .map(|at| local_time(at).format("%Y-%m-%d %H:%M").to_string()),
                id: path.id,
                name: path.name,
                category: path.category,
                active: path.active,
                schedule,
                next_run,
                schedule_error,
            }
        })
        .collect()
}

#[get("/styles")]
async fn styles() -> Result<rocket::fs::NamedFile, std::io::Error> {
    rocket::fs::NamedFile::open(Path::new(TEMPLATES_DIR).join("styles.css")).await
}

#[get("/")]
fn home(frame: &State<Arc<PathFrame>>) -> Template {
    let paths = path_views(frame, Local::now());
    let history = frame.tracker().history(HISTORY_SHOWN);
    Template::render("index", context! {paths, history})
}

#[get("/api/paths")]
fn api_paths(frame: &State<Arc<PathFrame>>) -> Json<Vec<PathView>> {
    Json(path_views(frame, Local::now()))
}

#[get("/api/running")]
fn api_running(frame: &State<Arc<PathFrame>>) -> Json<Vec<String>> {
    Json(frame.in_progress().into_iter().collect())
}

#[get("/api/history?<limit>")]
fn api_history(limit: Option<usize>, frame: &State<Arc<PathFrame>>) -> Json<Vec<HistoryEntry>> {
    Json(frame.tracker().history(limit.unwrap_or(HISTORY_SHOWN)))
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct Triggered {
    id: String,
    started: bool,
}

#[get("/api/path/<id>/trigger")]
fn trigger(id: &str, frame: &State<Arc<PathFrame>>) -> Result<Json<Triggered>, NotFound<String>> {
    match frame.trigger(id) {
        Ok(started) => Ok(Json(Triggered {
            id: id.to_string(),
            started,
        })),
        Err(error) => {
            warn!("path ID#{id} - Trigger Refused - {error}");
            Err(NotFound(error.to_string()))
        }
    }
}

#[get("/shutdown")]
fn shutdown(frame: &State<Arc<PathFrame>>, server: Shutdown) -> &'static str {
    info!("PathFrame Shutdown Requested");
    let frame = Arc::clone(frame.inner());
    std::thread::spawn(move || frame.quit());
    server.notify();
    "PathFrame is shutting down"
}

const BASE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>

<head>
    <meta charset="utf-8" />
    <title>PathFrame</title>
    <link rel="stylesheet" href="/styles">
</head>

<body>
    <div id="wrapper">
        <div id="container">
            <header>
                <div id="logo">
                    <a href="/"><span style="color:#494949">Path</span><span style="color:#FF3D00">Frame</span></a>
                </div>
            </header>
            <div id="content">
                {% block content %}
                {% endblock content %}
            </div>
        </div>
    </div>
    <script>
        const reloadPage = () => location.reload();

        const triggerPath = (id) => {
            fetch("/api/path/" + id + "/trigger").then(() => reloadPage());
        };

        window.setInterval(reloadPage, 30000);
    </script>
</body>

</html>"#;

const INDEX_TEMPLATE: &str = r#"{% extends "base" %}

{% block content %}
<table id="path_list">
    <tr>
        <th colspan="6">
            Automation Paths
            <div id="refresh" onclick="reloadPage()">&#8635;</div>
        </th>
    </tr>
    <tr class="heading">
        <td>Name</td>
        <td>Schedule</td>
        <td>Next Run</td>
        <td>Last Run</td>
        <td>Status</td>
        <td></td>
    </tr>
    {% for path in paths %}
    <tr>
        <td>
            {{path.name}}
            {% if path.category %}<div class="category">{{path.category}}</div>{% endif %}
        </td>
        <td>{{path.schedule}}</td>
        <td>
            {% if path.nextRunLabel %}{{path.nextRunLabel}}
            {% elif path.scheduleError %}<span class="line_status_orange">{{path.scheduleError}}</span>
            {% else %}-{% endif %}
        </td>
        <td>{% if path.lastRun %}{{path.lastRun}}{% else %}Never{% endif %}</td>
        <td>
            {% if path.running %}
            <div class="line_status_green">Running</div>
            {% elif path.active %}
            <div class="line_status_yellow">Active</div>
            {% else %}
            <div class="line_status_gray">Paused</div>
            {% endif %}
        </td>
        <td><button onclick="triggerPath('{{path.id}}')" {% if path.running %}disabled{% endif %}>Run now</button></td>
    </tr>
    {% endfor %}
</table>

<table id="history">
    <tr>
        <th colspan="4">Recent Runs</th>
    </tr>
    {% for run in history %}
    <tr>
        <td>{{run.pathId}}</td>
        <td>{{run.finishedAt}}</td>
        <td>
            {% if run.status == "Success" %}
            <div class="line_status_green">Success</div>
            {% else %}
            <div class="line_status_orange">Failed</div>
            {% endif %}
        </td>
        <td>{% if run.error %}{{run.error}}{% endif %}</td>
    </tr>
    {% endfor %}
</table>
{% endblock content %}"#;

const STYLES: &str = r#"body{
    background: #F6F6F6;
    color: #494949;
    font-family: sans-serif;
    margin: 0;
}

a{
    text-decoration: none;
}

a:link, a:visited {
    color: #FF3D00;
}

header{
    display: flex;
    padding: 15px;
    align-items: center;
}

#logo{
    font-weight: bold;
    font-size: 30pt;
}

#refresh{
    display: inline-block;
    opacity: 0.5;
    cursor: pointer;
}

#refresh:hover{
    opacity: 1;
}

#wrapper{
    display: flex;
    justify-content: center;
    padding: 30px 0;
}

#container{
    display: flex;
    flex-direction: column;
    gap: 5px;
    background: white;
    padding: 10px;
    box-shadow: 0px 0px 3px 0px rgba(0,0,0,.1);
    border-top: 4px solid #FF3D00;
    max-width: 1200px;
}

#content{
    display: flex;
    flex-direction: column;
    gap: 20px;
    background: #F1F1F1;
    padding: 15px;
    border-radius: 6px;
}

button {
    background-color: rgba(0,0,0,.5);
    color: white;
    padding: 10px;
    border: none;
    border-radius: 4px;
    cursor: pointer;
}

button:hover {
    background-color: #4CAF50;
}

button:disabled {
    background-color: rgba(0,0,0,.2);
    cursor: default;
}

.category{
    font-size: 10pt;
    opacity: 0.6;
}

.line_status_green, .line_status_yellow, .line_status_orange, .line_status_gray{
    font-weight: bold;
    display: inline-block;
    padding: 8px;
    border-radius: 6px;
    border: 1px solid rgba(0,0,0,.1);
    color: rgba(0,0,0,.4);
}

.line_status_green{
    background: rgba(51, 255, 0, .5);
}

.line_status_yellow{
    background: rgba(255, 236, 102, 1);
}

.line_status_orange{
    background: rgba(255, 61, 0, .8);
}

.line_status_gray{
    background: rgba(0, 0, 0, .3);
}

table{
    border-collapse: collapse;
}

td{
    padding: 12px;
    border-bottom: 1px solid rgba(0,0,0,.05)
}

th{
    text-align: left;
    font-size: 20pt;
    padding: 15px;
}

tr.heading td{
    font-weight: bold;
}

tr:last-child td{
    border: 0px;
}"#;
