use iced::{
    widget::{button, column, image, row, scrollable, text, text_input, container, Column, Row},
    alignment::Horizontal,
    Alignment, Element, Length, Application, Command, Settings, Theme, Subscription, Color, Background,
    theme,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use log::{error, info, warn};

use nexus_chat_client::api::{ApiClient, QrCode};
use nexus_chat_client::config::ClientConfig;
use nexus_chat_client::connection::ConnectionState;
use nexus_chat_client::dispatcher::{Outcome, Redraw};
use nexus_chat_client::models::{MessageId, MessageRecord, NearbyDevice};
use nexus_chat_client::render::{Body, DeliveryMark, RenderCache, RenderedMessage, Side, TOMBSTONE_TEXT};
use nexus_chat_client::session::{Session, SessionSettings};
use nexus_chat_client::transport::{Transport, TransportConfig, TransportEvent, TransportHandle};

const TICK_INTERVAL: Duration = Duration::from_millis(500);
const QUICK_REACTION: &str = "👍";

type PendingTransport = Arc<Mutex<Option<(Transport, mpsc::Receiver<TransportEvent>)>>>;

struct ChatApp {
    api: ApiClient,
    session: Session<TransportHandle>,
    pending: PendingTransport,
    rendered: RenderCache,
    connection: ConnectionState,
    editing: Option<(MessageId, String)>,
    confirm_delete: Option<MessageId>,
    upload_path: String,
    nearby: Vec<NearbyDevice>,
    qr: Option<QrCode>,
    status: String,
    scroll_id: scrollable::Id,
}

#[derive(Clone, Debug)]
enum AppMessage {
    DraftChanged(String),
    Send,
    EditStart(MessageId),
    EditChanged(String),
    EditSubmit,
    EditCancel,
    DeleteRequested(MessageId),
    DeleteConfirmed(MessageId),
    DeleteCancelled,
    React(MessageId),
    Reconnect,
    UploadPathChanged(String),
    Upload,
    Uploaded(Result<MessageRecord, String>),
    RefreshNearby,
    NearbyLoaded(Result<Vec<NearbyDevice>, String>),
    ShowQr,
    QrLoaded(Result<QrCode, String>),
    Transport(TransportEvent),
    Tick,
}

/// Progress of the channel subscription.
enum Feed {
    Starting(PendingTransport),
    Running(mpsc::Receiver<TransportEvent>),
    Finished,
}

impl Application for ChatApp {
    type Executor = iced::executor::Default;
    type Message = AppMessage;
    type Theme = Theme;
    type Flags = (ClientConfig, TransportConfig, ApiClient);

    fn new((config, channel, api): Self::Flags) -> (Self, Command<AppMessage>) {
        let (handle, transport, events) = Transport::new(channel);
        let settings = SessionSettings {
            typing_quiet: config.typing_quiet,
            ..SessionSettings::default()
        };
        let session = Session::new(
            config.conversation_id.clone(),
            config.username.clone(),
            handle,
            settings,
        );
        (
            ChatApp {
                api,
                rendered: RenderCache::new(config.username.clone()),
                session,
                pending: Arc::new(Mutex::new(Some((transport, events)))),
                connection: ConnectionState::Connecting,
                editing: None,
                confirm_delete: None,
                upload_path: String::new(),
                nearby: vec![],
                qr: None,
                status: String::new(),
                scroll_id: scrollable::Id::new("chat_scroll"),
            },
            Command::none(),
        )
    }

    fn title(&self) -> String {
        format!("Nexus Chat: conversation {}", self.session.conversation_id())
    }

    fn update(&mut self, message: AppMessage) -> Command<AppMessage> {
        match message {
            AppMessage::DraftChanged(draft) => {
                self.session.update_draft(draft, Instant::now());
                Command::none()
            }
            AppMessage::Send => {
                if let Err(e) = self.session.submit_draft() {
                    self.status = e.to_string();
                }
                Command::none()
            }
            AppMessage::EditStart(id) => {
                let current = match self.rendered.entries().iter().find(|m| m.id == id) {
                    Some(RenderedMessage { body: Body::Text(content), .. }) => content.clone(),
                    _ => String::new(),
                };
                self.editing = Some((id, current));
                Command::none()
            }
            AppMessage::EditChanged(content) => {
                if let Some((_, draft)) = self.editing.as_mut() {
                    *draft = content;
                }
                Command::none()
            }
            AppMessage::EditSubmit => {
                if let Some((id, content)) = self.editing.take() {
                    if let Err(e) = self.session.submit_edit(id, &content) {
                        self.status = e.to_string();
                        self.editing = Some((id, content));
                    }
                }
                Command::none()
            }
            AppMessage::EditCancel => {
                self.editing = None;
                Command::none()
            }
            AppMessage::DeleteRequested(id) => {
                self.confirm_delete = Some(id);
                Command::none()
            }
            AppMessage::DeleteConfirmed(id) => {
                let confirmed = self.confirm_delete.take() == Some(id);
                if let Err(e) = self.session.submit_delete(id, |_| confirmed) {
                    self.status = e.to_string();
                }
                Command::none()
            }
            AppMessage::DeleteCancelled => {
                self.confirm_delete = None;
                Command::none()
            }
            AppMessage::React(id) => {
                if let Err(e) = self.session.submit_reaction(id, QUICK_REACTION) {
                    self.status = e.to_string();
                }
                Command::none()
            }
            AppMessage::Reconnect => {
                self.session.sink().reconnect();
                Command::none()
            }
            AppMessage::UploadPathChanged(path) => {
                self.upload_path = path;
                Command::none()
            }
            AppMessage::Upload => {
                let path = self.upload_path.trim();
                if path.is_empty() {
                    return Command::none();
                }
                let path = PathBuf::from(path);
                let api = self.api.clone();
                let conversation = self.session.conversation_id().to_string();
                self.status = format!("Uploading {}…", path.display());
                Command::perform(
                    async move {
                        api.upload_media(&conversation, &path)
                            .await
                            .map_err(|e| e.to_string())
                    },
                    AppMessage::Uploaded,
                )
            }
            AppMessage::Uploaded(result) => {
                self.upload_path.clear();
                match result {
                    Ok(record) => {
                        self.status.clear();
                        let outcome = self.session.append_record(record, Instant::now());
                        self.apply(outcome)
                    }
                    Err(e) => {
                        error!("upload failed: {e}");
                        self.status = format!("Upload failed: {e}");
                        Command::none()
                    }
                }
            }
            AppMessage::RefreshNearby => {
                let api = self.api.clone();
                Command::perform(
                    async move { api.nearby_devices().await.map_err(|e| e.to_string()) },
                    AppMessage::NearbyLoaded,
                )
            }
            AppMessage::NearbyLoaded(result) => {
                match result {
                    Ok(devices) => self.nearby = devices,
                    Err(e) => {
                        warn!("discovery heartbeat failed: {e}");
                        self.status = format!("Nearby lookup failed: {e}");
                    }
                }
                Command::none()
            }
            AppMessage::ShowQr => {
                let api = self.api.clone();
                Command::perform(
                    async move { api.connect_qr().await.map_err(|e| e.to_string()) },
                    AppMessage::QrLoaded,
                )
            }
            AppMessage::QrLoaded(result) => {
                match result {
                    Ok(qr) => self.qr = Some(qr),
                    Err(e) => {
                        warn!("qr code unavailable: {e}");
                        self.status = format!("QR code unavailable: {e}");
                    }
                }
                Command::none()
            }
            AppMessage::Transport(TransportEvent::State(state)) => {
                info!("channel state: {state:?}");
                self.connection = state;
                Command::none()
            }
            AppMessage::Transport(TransportEvent::Frame(frame)) => {
                let outcome = self.session.handle_frame(&frame, Instant::now());
                self.apply(outcome)
            }
            AppMessage::Tick => {
                if let Some(redraw) = self.session.tick(Instant::now()) {
                    self.rendered.apply(self.session.timeline(), &redraw);
                }
                Command::none()
            }
        }
    }

    fn view(&self) -> Element<AppMessage> {
        let mut header = row![
            text(format!("Conversation {}", self.session.conversation_id())).size(24),
            text(self.connection.label()).size(14),
        ]
            .spacing(20)
            .align_items(Alignment::Center);
        if matches!(
            self.connection,
            ConnectionState::GaveUp | ConnectionState::Reconnecting { .. }
        ) {
            header = header.push(button("Reconnect").on_press(AppMessage::Reconnect).padding(5));
        }
        for (user, online) in self.session.view().presence() {
            let label = if online { "Online" } else { "Offline" };
            header = header.push(text(format!("{user}: {label}")).size(14));
        }

        let message_display = scrollable(
            Column::with_children(
                self.rendered
                    .entries()
                    .iter()
                    .map(|message| self.bubble(message))
                    .collect::<Vec<_>>(),
            )
                .spacing(10)
                .padding(10)
                .width(Length::Fill),
        )
            .height(Length::Fill)
            .id(self.scroll_id.clone());

        let typing = match self.session.view().typing.user() {
            Some(user) => text(format!("{user} is typing…")).size(14),
            None => text("").size(14),
        };

        let composer: Element<AppMessage> = match &self.editing {
            Some((id, draft)) => row![
                text(format!("Editing #{id}")).size(14),
                text_input("Edit message", draft)
                    .on_input(AppMessage::EditChanged)
                    .on_submit(AppMessage::EditSubmit)
                    .padding(10)
                    .width(Length::Fill)
                    .style(theme::TextInput::Default),
                button("Save").on_press(AppMessage::EditSubmit).padding(10),
                button("Cancel").on_press(AppMessage::EditCancel).padding(10),
            ]
                .spacing(10)
                .align_items(Alignment::Center)
                .into(),
            None => row![
                text_input("Type a message", self.session.composer().draft())
                    .on_input(AppMessage::DraftChanged)
                    .on_submit(AppMessage::Send)
                    .padding(10)
                    .width(Length::Fill)
                    .style(theme::TextInput::Default),
                button("Send").on_press(AppMessage::Send).padding(10),
            ]
                .spacing(10)
                .into(),
        };

        let upload = row![
            text_input("File path", &self.upload_path)
                .on_input(AppMessage::UploadPathChanged)
                .on_submit(AppMessage::Upload)
                .padding(10)
                .width(Length::Fill)
                .style(theme::TextInput::Default),
            button("Upload").on_press(AppMessage::Upload).padding(10),
        ]
            .spacing(10);

        let status = text(&self.status).size(16);

        container(
            row![
                column![header, message_display, typing, composer, upload, status]
                    .spacing(10)
                    .padding(20)
                    .width(Length::FillPortion(3)),
                self.nearby_panel(),
            ]
                .spacing(10),
        )
            .style(|_theme: &Theme| container::Appearance {
                background: Some(Background::Color(Color::from_rgb(0.93, 0.93, 0.95))),
                ..Default::default()
            })
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn subscription(&self) -> Subscription<AppMessage> {
        struct ChannelSubscription;

        let channel = iced::subscription::unfold(
            std::any::TypeId::of::<ChannelSubscription>(),
            Feed::Starting(Arc::clone(&self.pending)),
            |feed| async move {
                let mut feed = feed;
                loop {
                    feed = match feed {
                        Feed::Starting(pending) => {
                            let taken = pending.lock().await.take();
                            match taken {
                                Some((transport, events)) => {
                                    tokio::spawn(transport.run());
                                    Feed::Running(events)
                                }
                                None => Feed::Finished,
                            }
                        }
                        Feed::Running(mut events) => match events.recv().await {
                            Some(event) => return (AppMessage::Transport(event), Feed::Running(events)),
                            None => Feed::Finished,
                        },
                        Feed::Finished => {
                            std::future::pending::<()>().await;
                            Feed::Finished
                        }
                    };
                }
            },
        );

        Subscription::batch(vec![
            channel,
            iced::time::every(TICK_INTERVAL).map(|_| AppMessage::Tick),
        ])
    }
}

impl ChatApp {
    fn apply(&mut self, outcome: Outcome) -> Command<AppMessage> {
        if let Some(notification) = outcome.notification {
            self.status = format!("{}: {}", notification.sender, notification.preview);
        }
        match outcome.redraw {
            Some(redraw) => {
                self.rendered.apply(self.session.timeline(), &redraw);
                if matches!(redraw, Redraw::Appended(_)) {
                    scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
                } else {
                    Command::none()
                }
            }
            None => Command::none(),
        }
    }

    fn bubble<'a>(&self, message: &'a RenderedMessage) -> Element<'a, AppMessage> {
        let grey = Color::from_rgb(0.5, 0.5, 0.5);
        let mut content = Column::new().spacing(4);

        if message.side == Side::Received {
            content = content.push(text(&message.sender).size(13).style(grey));
        }
        content = content.push(match &message.body {
            Body::Text(body) => text(body).size(16),
            Body::Media { kind, url } => text(format!("{} {url}", kind.label())).size(16),
            Body::System(line) => text(line).size(14).style(grey),
            Body::Tombstone => text(TOMBSTONE_TEXT).size(14).style(grey),
        });

        let mut meta = row![text(&message.time).size(12).style(grey)].spacing(5);
        if message.edited {
            meta = meta.push(text("edited").size(12).style(grey));
        }
        match message.delivery {
            Some(DeliveryMark::Sent) => meta = meta.push(text("✓").size(12).style(grey)),
            Some(DeliveryMark::Read) => meta = meta.push(text("✓✓").size(12)),
            None => {}
        }
        content = content.push(meta);

        if !message.reactions.is_empty() {
            content = content.push(Row::with_children(
                message
                    .reactions
                    .iter()
                    .map(|(emoji, count)| text(format!("{emoji} {count}")).size(13).into())
                    .collect::<Vec<_>>(),
            )
                .spacing(6));
        }

        if message.is_actionable() {
            content = content.push(self.actions(message));
        }

        let is_sender = message.side == Side::Sent;
        let bubble = container(content)
            .padding(10)
            .max_width(400)
            .style(move |_theme: &Theme| container::Appearance {
                background: Some(Background::Color(if is_sender {
                    Color::from_rgb(0.2, 0.6, 1.0)
                } else {
                    Color::from_rgb(1.0, 1.0, 1.0)
                })),
                border: iced::Border {
                    color: Color::from_rgb(0.7, 0.7, 0.7),
                    width: 1.0,
                    radius: 8.0.into(),
                },
                ..Default::default()
            });

        container(bubble)
            .width(Length::Fill)
            .align_x(match message.side {
                Side::Sent => Horizontal::Right,
                Side::Received => Horizontal::Left,
                Side::System => Horizontal::Center,
            })
            .into()
    }

    fn actions<'a>(&self, message: &'a RenderedMessage) -> Element<'a, AppMessage> {
        let id = message.id;
        if self.confirm_delete == Some(id) {
            return row![
                text("Delete this message?").size(13),
                button("Delete").on_press(AppMessage::DeleteConfirmed(id)).padding(4),
                button("Keep").on_press(AppMessage::DeleteCancelled).padding(4),
            ]
                .spacing(6)
                .align_items(Alignment::Center)
                .into();
        }

        let mut actions = row![button(QUICK_REACTION).on_press(AppMessage::React(id)).padding(4)].spacing(6);
        if message.side == Side::Sent {
            if matches!(message.body, Body::Text(_)) {
                actions = actions.push(button("Edit").on_press(AppMessage::EditStart(id)).padding(4));
            }
            actions = actions.push(button("Delete").on_press(AppMessage::DeleteRequested(id)).padding(4));
        }
        actions.into()
    }

    fn nearby_panel(&self) -> Element<AppMessage> {
        let devices = Column::with_children(
            self.nearby
                .iter()
                .map(|device| {
                    column![
                        text(&device.username).size(15),
                        text(device.label()).size(12).style(Color::from_rgb(0.5, 0.5, 0.5)),
                    ]
                        .into()
                })
                .collect::<Vec<_>>(),
        )
            .spacing(8);

        let mut panel = column![
            text("Nearby").size(20),
            button("Find nearby").on_press(AppMessage::RefreshNearby).padding(8),
            devices,
            button("Show connect QR").on_press(AppMessage::ShowQr).padding(8),
        ]
            .spacing(10)
            .padding(20)
            .width(Length::FillPortion(1));

        if let Some(qr) = &self.qr {
            panel = panel.push(image(image::Handle::from_memory(qr.png.clone())).width(Length::Fixed(180.0)));
        }
        panel.into()
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = ClientConfig::from_env()?;
    let channel = config.transport()?;
    let api = ApiClient::new(&config)?;
    info!(
        "opening conversation {} on {} as {}",
        config.conversation_id, config.server_url, config.username
    );
    ChatApp::run(Settings::with_flags((config, channel, api)))?;
    Ok(())
}
