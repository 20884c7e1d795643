use chrono::{DateTime, Utc};
use form::{FilterField, FilterForm};
use iced::{
    time,
    widget::{button, column, row, scrollable, text, text_input, Canvas, Column, Container, Row},
    Alignment, Color, Element, Length, Subscription, Task, Theme,
};
use log::{info, warn};
use map::{status_color, DetectionMap};
use minewatchcore::model::{Detection, Method, Note, Status, TimelineEntry};
use minewatchcore::views::{HighlightKey, Window};
use minewatchcore::{
    ChangeFeedClient, DashboardConfig, DashboardFrame, DashboardSession, DetectionStore,
    HttpBackend, Mutations, StoreOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod form;
mod map;

type Store = DetectionStore<HttpBackend>;

fn main() -> iced::Result {
    env_logger::init();
    let config = DashboardConfig::from_env().unwrap_or_else(|err| {
        warn!("{}; falling back to default dashboard config", err);
        DashboardConfig::default()
    });

    iced::application(
        move || Dashboard::boot(config.clone()),
        Dashboard::update,
        Dashboard::view,
    )
    .title(application_title)
    .subscription(application_subscription)
    .theme(application_theme)
    .run()
}

fn application_title(_: &Dashboard) -> String {
    "Minewatch Detection Dashboard".into()
}

fn application_subscription(_: &Dashboard) -> Subscription<Message> {
    time::every(Duration::from_millis(250)).map(|_| Message::Tick)
}

fn application_theme(_: &Dashboard) -> Theme {
    Theme::Dark
}

fn highlight_color() -> Color {
    Color::from_rgb(0.18, 0.72, 0.89)
}

fn warning_color() -> Color {
    Color::from_rgb(0.95, 0.4, 0.3)
}

#[derive(Debug)]
struct Dashboard {
    session: DashboardSession<HttpBackend>,
    mutations: Mutations<HttpBackend, HttpBackend>,
    backend: HttpBackend,
    frame: DashboardFrame,
    form: FilterForm,
    selected: Option<String>,
    activity: Option<Activity>,
    note_draft: String,
    assignee_draft: String,
    status: String,
    last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct Activity {
    detection_id: String,
    timeline: Vec<TimelineEntry>,
    notes: Vec<Note>,
}

#[derive(Debug, Clone)]
enum Message {
    Tick,
    Connected,
    FilterChanged(FilterField, String),
    ToggleMethod(Method),
    ToggleStatus(Status),
    ToggleLocation(String),
    ClearFilters,
    Select(String),
    ActivityFetched(Result<Activity, String>),
    SetStatus(String, Status),
    NoteChanged(String),
    SubmitNote,
    AssigneeChanged(String),
    SubmitAssignment,
    MutationFinished(Result<String, String>),
    DownloadReport(String),
    ReportSaved(Result<String, String>),
}

impl Dashboard {
    fn boot(config: DashboardConfig) -> (Self, Task<Message>) {
        let backend = HttpBackend::from_config(&config);
        let store = DetectionStore::create(backend.clone(), StoreOptions::from_config(&config));
        let feed = ChangeFeedClient::from_config(&config);
        info!("dashboard connecting to {}", config.backend_url);

        (
            Dashboard {
                session: DashboardSession::new(Arc::clone(&store), &config),
                mutations: Mutations::new(Arc::clone(&store), Arc::new(backend.clone())),
                backend,
                frame: DashboardFrame::default(),
                form: FilterForm::default(),
                selected: None,
                activity: None,
                note_draft: String::new(),
                assignee_draft: String::new(),
                status: format!("Connecting to {}...", config.backend_url),
                last_error: None,
            },
            Task::perform(connect(store, feed), |_| Message::Connected),
        )
    }

    fn update(state: &mut Self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                state.refresh_frame();
                Task::none()
            }
            Message::Connected => {
                state.status = "Live: polling and change feed active".into();
                Task::none()
            }
            Message::FilterChanged(field, value) => {
                state
                    .form
                    .update_field(field, value, state.session.filters_mut());
                state.refresh_frame();
                Task::none()
            }
            Message::ToggleMethod(method) => {
                state.session.filters_mut().toggle_method(method);
                state.refresh_frame();
                Task::none()
            }
            Message::ToggleStatus(status) => {
                state.session.filters_mut().toggle_status(status);
                state.refresh_frame();
                Task::none()
            }
            Message::ToggleLocation(location) => {
                state.session.filters_mut().toggle_location(&location);
                state.refresh_frame();
                Task::none()
            }
            Message::ClearFilters => {
                state.session.filters_mut().clear_filters();
                state.form.reset();
                state.refresh_frame();
                Task::none()
            }
            Message::Select(id) => {
                state.selected = Some(id.clone());
                state.activity = None;
                state.note_draft.clear();
                state.assignee_draft.clear();
                state.load_activity(id)
            }
            Message::ActivityFetched(Ok(activity)) => {
                if state.selected.as_deref() == Some(activity.detection_id.as_str()) {
                    state.activity = Some(activity);
                }
                Task::none()
            }
            Message::ActivityFetched(Err(err)) => {
                state.last_error = Some(format!("Activity: {err}"));
                Task::none()
            }
            Message::SetStatus(id, status) => {
                let mutations = state.mutations.clone();
                Task::perform(
                    async move {
                        mutations
                            .update_status(&id, status)
                            .await
                            .map(|d| format!("{} marked {}", d.id, d.status))
                            .map_err(|e| e.to_string())
                    },
                    Message::MutationFinished,
                )
            }
            Message::NoteChanged(value) => {
                state.note_draft = value;
                Task::none()
            }
            Message::SubmitNote => {
                let Some(id) = state.selected.clone() else {
                    return Task::none();
                };
                if state.note_draft.trim().is_empty() {
                    return Task::none();
                }
                let content = state.note_draft.clone();
                let mutations = state.mutations.clone();
                Task::perform(
                    async move {
                        mutations
                            .add_note(&id, &content)
                            .await
                            .map(|note| format!("Note added to {}", note.detection_id))
                            .map_err(|e| e.to_string())
                    },
                    Message::MutationFinished,
                )
            }
            Message::AssigneeChanged(value) => {
                state.assignee_draft = value;
                Task::none()
            }
            Message::SubmitAssignment => {
                let Some(id) = state.selected.clone() else {
                    return Task::none();
                };
                if state.assignee_draft.trim().is_empty() {
                    return Task::none();
                }
                let user_id = state.assignee_draft.trim().to_owned();
                let mutations = state.mutations.clone();
                Task::perform(
                    async move {
                        mutations
                            .assign(&id, &user_id)
                            .await
                            .map(|d| format!("{} assigned to {}", d.id, user_id))
                            .map_err(|e| e.to_string())
                    },
                    Message::MutationFinished,
                )
            }
            Message::MutationFinished(Ok(summary)) => {
                state.status = summary;
                state.last_error = None;
                state.note_draft.clear();
                state.assignee_draft.clear();
                state.refresh_frame();
                match state.selected.clone() {
                    Some(id) => state.load_activity(id),
                    None => Task::none(),
                }
            }
            Message::MutationFinished(Err(err)) => {
                state.last_error = Some(err);
                Task::none()
            }
            Message::DownloadReport(id) => {
                Task::perform(save_report(state.backend.clone(), id), Message::ReportSaved)
            }
            Message::ReportSaved(Ok(path)) => {
                state.status = format!("Report saved to {path}");
                Task::none()
            }
            Message::ReportSaved(Err(err)) => {
                state.last_error = Some(format!("Report: {err}"));
                Task::none()
            }
        }
    }

    fn view(state: &Self) -> Element<'_, Message> {
        let frame = &state.frame;

        let filter_column = state.filter_bar().width(Length::Fixed(340.0));

        let newest = frame
            .is_highlighted(HighlightKey::NewestDetection)
            .then(|| frame.recent.first().map(|d| d.id.as_str()))
            .flatten();
        let detection_map = Canvas::new(DetectionMap::new(
            &frame.filtered,
            state.selected.as_deref(),
            newest,
        ))
        .width(Length::Fill)
        .height(Length::Fixed(240.0));

        let table = frame.filtered.iter().fold(Column::new().spacing(2), |col, d| {
            col.push(detection_row(d, state.selected.as_deref() == Some(d.id.as_str())))
        });

        let overview_column = column![
            row![
                breakdown_column(frame, Window::AllTime, "All time"),
                breakdown_column(frame, Window::Last7Days, "Last 7 days"),
                recent_column(frame),
            ]
            .spacing(24),
            text("Detection map (lat / lng)").size(16),
            detection_map,
            text(format!(
                "Detections: {} shown of {}",
                frame.filtered.len(),
                frame.total
            ))
            .size(16),
            table_header(),
            Container::new(scrollable(table).height(Length::Fill)).padding(4),
        ]
        .spacing(10)
        .width(Length::Fill);

        let selected_column = Container::new(state.selected_panel())
            .padding(6)
            .width(Length::Fixed(360.0));

        let layout = column![
            row![filter_column, overview_column, selected_column]
                .spacing(20)
                .align_y(Alignment::Start)
                .height(Length::Fill),
            state.status_line(),
        ]
        .spacing(10)
        .padding(20);

        Container::new(layout)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn refresh_frame(&mut self) {
        self.frame = self.session.frame(Instant::now(), Utc::now());
    }

    fn load_activity(&self, id: String) -> Task<Message> {
        Task::perform(
            fetch_activity(self.backend.clone(), id),
            Message::ActivityFetched,
        )
    }

    fn selected_detection(&self) -> Option<Detection> {
        let id = self.selected.as_deref()?;
        self.session
            .store()
            .snapshot()
            .detections
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    fn filter_bar(&self) -> Column<'_, Message> {
        let spec = self.session.filters().spec();

        let methods = Method::ALL.iter().fold(Row::new().spacing(4), |row, method| {
            row.push(toggle(
                method.label().to_owned(),
                spec.methods.contains(method),
                Message::ToggleMethod(*method),
            ))
        });
        let statuses = Status::ALL.iter().fold(Row::new().spacing(4), |row, status| {
            row.push(toggle(
                status.label().to_owned(),
                spec.statuses.contains(status),
                Message::ToggleStatus(*status),
            ))
        });
        let locations = self
            .frame
            .options
            .locations
            .iter()
            .fold(Row::new().spacing(4), |row, location| {
                row.push(toggle(
                    location.clone(),
                    spec.locations.contains(location),
                    Message::ToggleLocation(location.clone()),
                ))
            });

        column![
            text("Filters").size(26),
            text_input("Search location or id", &self.form.search)
                .on_input(|value| Message::FilterChanged(FilterField::Search, value))
                .padding(6),
            text("Method").size(16),
            methods.wrap(),
            text("Status").size(16),
            statuses.wrap(),
            text("Location").size(16),
            locations.wrap(),
            text("Confidence (%)").size(16),
            row![
                text_input("Min", &self.form.confidence_min)
                    .on_input(|value| Message::FilterChanged(FilterField::ConfidenceMin, value))
                    .padding(6),
                text_input("Max", &self.form.confidence_max)
                    .on_input(|value| Message::FilterChanged(FilterField::ConfidenceMax, value))
                    .padding(6),
            ]
            .spacing(6),
            text("Date (YYYY-MM-DD)").size(16),
            row![
                text_input("From", &self.form.date_from)
                    .on_input(|value| Message::FilterChanged(FilterField::DateFrom, value))
                    .padding(6),
                text_input("To", &self.form.date_to)
                    .on_input(|value| Message::FilterChanged(FilterField::DateTo, value))
                    .padding(6),
            ]
            .spacing(6),
            button("Clear filters")
                .on_press(Message::ClearFilters)
                .padding(10),
        ]
        .spacing(10)
    }

    fn selected_panel(&self) -> Element<'_, Message> {
        let Some(detection) = self.selected_detection() else {
            return column![
                text("Selected detection").size(20),
                text("Select a detection to triage it").size(13),
            ]
            .spacing(8)
            .into();
        };

        let id = detection.id.clone();
        let status_buttons = Status::ALL.iter().fold(Row::new().spacing(6), |row, status| {
            row.push(toggle(
                status.label().to_owned(),
                detection.status == *status,
                Message::SetStatus(id.clone(), *status),
            ))
        });
        let reading = detection
            .details
            .as_ref()
            .and_then(|details| details.describe(detection.method))
            .unwrap_or_else(|| "no reading".into());

        let activity = self
            .activity
            .as_ref()
            .filter(|activity| activity.detection_id == id);
        let notes = match activity {
            Some(activity) if activity.notes.is_empty() => {
                Column::new().push(text("No notes yet").size(12))
            }
            Some(activity) => activity
                .notes
                .iter()
                .rev()
                .fold(Column::new().spacing(4), |col, note| {
                    col.push(
                        text(format!(
                            "{} · {}: {}",
                            short_time(note.created_at),
                            note.author,
                            note.content
                        ))
                        .size(12),
                    )
                }),
            None => Column::new().push(text("Loading...").size(12)),
        };
        let timeline = match activity {
            Some(activity) => activity
                .timeline
                .iter()
                .rev()
                .fold(Column::new().spacing(4), |col, entry| {
                    col.push(
                        text(format!(
                            "{} · {} · {}",
                            short_time(entry.created_at),
                            entry.actor,
                            entry.message
                        ))
                        .size(12),
                    )
                }),
            None => Column::new().push(text("Loading...").size(12)),
        };

        let report: Element<'_, Message> = if self.backend.reports_enabled() {
            button("Download report")
                .on_press(Message::DownloadReport(id))
                .padding(6)
                .into()
        } else {
            text("Reports need an external report service (report_service_url)")
                .size(12)
                .into()
        };

        column![
            text(format!("{} · {}", detection.id, detection.location)).size(20),
            text(format!(
                "{} · {:.0}% confidence · {}",
                detection.method,
                detection.confidence_percent(),
                reading
            ))
            .size(13),
            text(format!(
                "Lat {:.4}, Lng {:.4} · {}",
                detection.coordinates.lat,
                detection.coordinates.lng,
                short_time(detection.timestamp)
            ))
            .size(13),
            text(format!(
                "Assigned to: {}",
                detection.assigned_to.as_deref().unwrap_or("nobody")
            ))
            .size(13),
            status_buttons,
            text_input("Add a note", &self.note_draft)
                .on_input(Message::NoteChanged)
                .on_submit(Message::SubmitNote)
                .padding(6),
            button("Add note").on_press(Message::SubmitNote).padding(6),
            text_input("Assign to user id", &self.assignee_draft)
                .on_input(Message::AssigneeChanged)
                .on_submit(Message::SubmitAssignment)
                .padding(6),
            button("Assign").on_press(Message::SubmitAssignment).padding(6),
            report,
            text("Notes").size(16),
            Container::new(scrollable(notes).height(Length::Fixed(100.0))).padding(6),
            text("Timeline").size(16),
            Container::new(scrollable(timeline).height(Length::Fixed(160.0))).padding(6),
        ]
        .spacing(8)
        .into()
    }

    fn status_line(&self) -> Element<'_, Message> {
        let freshness = match (self.frame.stale, self.frame.last_update) {
            (_, None) => text("No data loaded yet").size(14).color(warning_color()),
            (true, Some(at)) => text(format!("Data is stale, last update {}", short_time(at)))
                .size(14)
                .color(warning_color()),
            (false, Some(at)) => text(format!("Updated {}", short_time(at))).size(14),
        };
        let counters = self.session.store().metrics();
        let mut line = row![
            freshness,
            text(&self.status).size(14),
            text(format!(
                "refreshes {} · failures {} · feed events {}",
                counters.refreshed, counters.failed, counters.feed_events
            ))
            .size(12),
        ]
        .spacing(20);
        if let Some(err) = &self.last_error {
            line = line.push(text(format!("Error: {err}")).size(14).color(warning_color()));
        }
        line.into()
    }
}

async fn connect(store: Arc<Store>, feed: ChangeFeedClient) {
    store.start();
    store.attach_feed(&feed);
}

async fn fetch_activity(backend: HttpBackend, id: String) -> Result<Activity, String> {
    let (timeline, notes) = tokio::join!(backend.timeline(&id), backend.notes(&id));
    Ok(Activity {
        timeline: timeline.map_err(|e| e.to_string())?,
        notes: notes.map_err(|e| e.to_string())?,
        detection_id: id,
    })
}

async fn save_report(backend: HttpBackend, id: String) -> Result<String, String> {
    let bytes = backend.fetch_report(&id).await.map_err(|e| e.to_string())?;
    let path = PathBuf::from(format!("report-{id}.pdf"));
    std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
    Ok(path.display().to_string())
}

fn short_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn toggle<'a>(label: String, active: bool, message: Message) -> Element<'a, Message> {
    button(text(label).size(13))
        .on_press(message)
        .padding(6)
        .style(if active {
            button::primary
        } else {
            button::secondary
        })
        .into()
}

fn counter<'a>(label: String, highlighted: bool) -> Element<'a, Message> {
    if highlighted {
        text(format!("● {label}"))
            .size(14)
            .color(highlight_color())
            .into()
    } else {
        text(label).size(14).into()
    }
}

fn breakdown_column<'a>(frame: &DashboardFrame, window: Window, title: &'a str) -> Column<'a, Message> {
    let breakdown = match window {
        Window::AllTime => &frame.stats.all_time,
        Window::Last7Days => &frame.stats.last_7_days,
    };
    let mut col = Column::new().spacing(4).push(text(title).size(18)).push(counter(
        format!("Total: {}", breakdown.total),
        frame.is_highlighted(HighlightKey::Total(window)),
    ));
    for method in Method::ALL {
        col = col.push(counter(
            format!("{}: {}", method, breakdown.methods.get(method)),
            frame.is_highlighted(HighlightKey::Method(window, method)),
        ));
    }
    for status in Status::ALL {
        col = col.push(counter(
            format!("{}: {}", status, breakdown.statuses.get(status)),
            frame.is_highlighted(HighlightKey::Status(window, status)),
        ));
    }
    col
}

fn recent_column<'a>(frame: &DashboardFrame) -> Column<'a, Message> {
    let newest_changed = frame.is_highlighted(HighlightKey::NewestDetection);
    let header = Column::new().spacing(4).push(text("Recent detections").size(18));
    if frame.recent.is_empty() {
        return header.push(text("No detections yet").size(12));
    }
    frame
        .recent
        .iter()
        .enumerate()
        .fold(header, |col, (idx, d)| {
            let line = format!(
                "{} · {} · {} · {}",
                d.id,
                d.location,
                d.method,
                short_time(d.timestamp)
            );
            col.push(counter(line, idx == 0 && newest_changed))
        })
}

fn table_header<'a>() -> Element<'a, Message> {
    row![
        text("Id").width(Length::Fixed(100.0)).size(13),
        text("Location").width(Length::Fixed(110.0)).size(13),
        text("Method").width(Length::Fixed(120.0)).size(13),
        text("Status").width(Length::Fixed(100.0)).size(13),
        text("Conf.").width(Length::Fixed(60.0)).size(13),
        text("Time").size(13),
    ]
    .spacing(8)
    .padding(4)
    .into()
}

fn detection_row<'a>(d: &Detection, selected: bool) -> Element<'a, Message> {
    let cells = row![
        text(d.id.clone()).width(Length::Fixed(100.0)).size(13),
        text(d.location.clone()).width(Length::Fixed(110.0)).size(13),
        text(d.method.label()).width(Length::Fixed(120.0)).size(13),
        text(d.status.label())
            .width(Length::Fixed(100.0))
            .size(13)
            .color(status_color(d.status)),
        text(format!("{:.0}%", d.confidence_percent()))
            .width(Length::Fixed(60.0))
            .size(13),
        text(short_time(d.timestamp)).size(13),
    ]
    .spacing(8);

    button(cells)
        .on_press(Message::Select(d.id.clone()))
        .padding(4)
        .width(Length::Fill)
        .style(if selected { button::primary } else { button::text })
        .into()
}
