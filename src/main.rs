use std::env;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use dotenv::dotenv;
use iced::{
    alignment::Horizontal,
    widget::{button, column, container, row, scrollable, text, text_input, Button},
    Alignment, Application, Background, Color, Command, Element, Length, Settings, Subscription,
    Theme,
};
use log::warn;

use simple_chat::error::ChatError;
use simple_chat::session::{ChatLine, Session, SessionState};
use simple_chat::storage::Storage;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let db_path = env::var("DATABASE_URL").unwrap_or("./chat.db".to_string());
    // Bootstrap failure is the only fatal storage error; anything later is
    // shown in the status line instead.
    let storage = Storage::open(&db_path)
        .with_context(|| format!("failed to initialize database at {db_path}"))?;

    ChatApp::run(Settings::with_flags(storage))?;
    Ok(())
}

struct ChatApp {
    storage: Storage,
    session: Session,
    screen: Screen,
    login_username: String,
    login_password: String,
    signup_username: String,
    signup_password: String,
    roster: Vec<(i64, String)>,
    transcript: Vec<ChatLine>,
    message_input: String,
    status: String,
    scroll_id: scrollable::Id,
}

#[derive(Default, Clone, PartialEq)]
enum Screen {
    #[default]
    Auth,
    Chat,
    About,
}

#[derive(Clone, Debug)]
enum AppMessage {
    LoginUsernameChanged(String),
    LoginPasswordChanged(String),
    SignupUsernameChanged(String),
    SignupPasswordChanged(String),
    MessageInputChanged(String),
    Login,
    SignUp,
    Logout,
    SelectPeer(i64),
    RefreshRoster,
    Send,
    PollTick,
    ShowAbout,
    LeaveAbout,
}

impl Application for ChatApp {
    type Executor = iced::executor::Default;
    type Message = AppMessage;
    type Theme = Theme;
    type Flags = Storage;

    fn new(storage: Storage) -> (Self, Command<AppMessage>) {
        (
            ChatApp {
                storage,
                session: Session::new(),
                screen: Screen::Auth,
                login_username: String::new(),
                login_password: String::new(),
                signup_username: String::new(),
                signup_password: String::new(),
                roster: vec![],
                transcript: vec![],
                message_input: String::new(),
                status: String::new(),
                scroll_id: scrollable::Id::new("chat_scroll"),
            },
            Command::none(),
        )
    }

    fn title(&self) -> String {
        String::from("Simple Chat")
    }

    fn update(&mut self, message: AppMessage) -> Command<AppMessage> {
        match message {
            AppMessage::LoginUsernameChanged(value) => {
                self.login_username = value;
                Command::none()
            }
            AppMessage::LoginPasswordChanged(value) => {
                self.login_password = value;
                Command::none()
            }
            AppMessage::SignupUsernameChanged(value) => {
                self.signup_username = value;
                Command::none()
            }
            AppMessage::SignupPasswordChanged(value) => {
                self.signup_password = value;
                Command::none()
            }
            AppMessage::MessageInputChanged(value) => {
                self.message_input = value;
                Command::none()
            }
            AppMessage::Login => {
                match self
                    .session
                    .login(&self.storage, &self.login_username, &self.login_password)
                {
                    Ok(roster) => {
                        self.roster = roster;
                        self.login_username.clear();
                        self.login_password.clear();
                        self.status.clear();
                        self.screen = Screen::Chat;
                    }
                    Err(e) => self.show_error(e),
                }
                Command::none()
            }
            AppMessage::SignUp => {
                match Session::sign_up(
                    &self.storage,
                    &self.signup_username,
                    &self.signup_password,
                ) {
                    Ok(_) => {
                        self.status = "Account created. You can now login.".to_string();
                        self.signup_username.clear();
                        self.signup_password.clear();
                    }
                    Err(e) => self.show_error(e),
                }
                Command::none()
            }
            AppMessage::Logout => {
                // Clearing the session also drops the poll subscription on
                // the next `subscription` call, so no tick can fire against a
                // logged-out session.
                self.session.logout();
                self.roster.clear();
                self.transcript.clear();
                self.message_input.clear();
                self.status.clear();
                self.screen = Screen::Auth;
                Command::none()
            }
            AppMessage::SelectPeer(peer_id) => {
                match self.session.select_peer(&self.storage, peer_id) {
                    Ok(messages) => {
                        self.transcript = self.session.view_transcript(&self.storage, &messages);
                        self.status.clear();
                    }
                    Err(e) => self.show_error(e),
                }
                self.snap_to_bottom()
            }
            AppMessage::RefreshRoster => {
                match self.session.refresh_roster(&self.storage) {
                    Ok(roster) => self.roster = roster,
                    Err(e) => self.show_error(e),
                }
                Command::none()
            }
            AppMessage::Send => {
                match self.session.send(&self.storage, &self.message_input) {
                    Ok(messages) => {
                        self.transcript = self.session.view_transcript(&self.storage, &messages);
                        self.message_input.clear();
                        self.status.clear();
                    }
                    Err(e) => self.show_error(e),
                }
                self.snap_to_bottom()
            }
            AppMessage::PollTick => {
                match self.session.poll(&self.storage) {
                    Ok(Some(messages)) => {
                        self.transcript = self.session.view_transcript(&self.storage, &messages);
                    }
                    Ok(None) => {}
                    Err(e) => self.show_error(e),
                }
                Command::none()
            }
            AppMessage::ShowAbout => {
                self.screen = Screen::About;
                Command::none()
            }
            AppMessage::LeaveAbout => {
                self.screen = match self.session.state() {
                    SessionState::LoggedIn { .. } => Screen::Chat,
                    SessionState::LoggedOut => Screen::Auth,
                };
                Command::none()
            }
        }
    }

    fn view(&self) -> Element<AppMessage> {
        match self.screen {
            Screen::Auth => self.view_auth(),
            Screen::Chat => self.view_chat(),
            Screen::About => self.view_about(),
        }
    }

    fn subscription(&self) -> Subscription<AppMessage> {
        // Poll clock runs only while logged in; ticks are serialized by the
        // runtime, so a slow tick is never overlapped by the next one.
        match self.session.state() {
            SessionState::LoggedIn { .. } => {
                iced::time::every(POLL_INTERVAL).map(|_| AppMessage::PollTick)
            }
            SessionState::LoggedOut => Subscription::none(),
        }
    }
}

impl ChatApp {
    fn show_error(&mut self, error: ChatError) {
        if let ChatError::Store(_) = &error {
            warn!("storage operation failed: {error}");
        }
        self.status = error.to_string();
    }

    fn snap_to_bottom(&self) -> Command<AppMessage> {
        scrollable::snap_to(
            self.scroll_id.clone(),
            scrollable::RelativeOffset { x: 0.0, y: 1.0 },
        )
    }

    fn view_auth(&self) -> Element<AppMessage> {
        let login_box = column![
            text("Login").size(20),
            text_input("Username", &self.login_username)
                .on_input(AppMessage::LoginUsernameChanged)
                .padding(10)
                .width(Length::Fixed(260.0)),
            text_input("Password", &self.login_password)
                .on_input(AppMessage::LoginPasswordChanged)
                .secure(true)
                .padding(10)
                .width(Length::Fixed(260.0)),
            button("Login").on_press(AppMessage::Login).padding(10),
        ]
        .spacing(10)
        .align_items(Alignment::Center);

        let signup_box = column![
            text("Sign Up").size(20),
            text_input("Username", &self.signup_username)
                .on_input(AppMessage::SignupUsernameChanged)
                .padding(10)
                .width(Length::Fixed(260.0)),
            text_input("Password", &self.signup_password)
                .on_input(AppMessage::SignupPasswordChanged)
                .secure(true)
                .padding(10)
                .width(Length::Fixed(260.0)),
            button("Create Account")
                .on_press(AppMessage::SignUp)
                .padding(10),
        ]
        .spacing(10)
        .align_items(Alignment::Center);

        let status = text(&self.status).size(16);
        let about_button = button("About").on_press(AppMessage::ShowAbout).padding(10);

        container(
            column![
                text("Welcome to Simple Chat").size(30),
                row![login_box, signup_box].spacing(40),
                about_button,
                status
            ]
            .spacing(20)
            .align_items(Alignment::Center),
        )
        .center_x()
        .center_y()
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    fn view_chat(&self) -> Element<AppMessage> {
        let header = row![
            text(format!(
                "Logged in as: {}",
                self.session.username().unwrap_or("?")
            ))
            .size(20),
            button("About").on_press(AppMessage::ShowAbout).padding(10),
            button("Logout").on_press(AppMessage::Logout).padding(10),
        ]
        .spacing(20)
        .align_items(Alignment::Center);

        let roster = column![
            text("Registered Users").size(20),
            scrollable(
                column(
                    self.roster
                        .iter()
                        .map(|(id, username)| {
                            Button::new(text(username).size(16))
                                .on_press(AppMessage::SelectPeer(*id))
                                .padding(5)
                                .width(Length::Fill)
                                .into()
                        })
                        .collect::<Vec<_>>()
                )
                .spacing(5)
            )
            .height(Length::Fill),
            button("Refresh")
                .on_press(AppMessage::RefreshRoster)
                .padding(10),
        ]
        .spacing(10)
        .width(Length::Fixed(200.0));

        let transcript = scrollable(
            column(
                self.transcript
                    .iter()
                    .map(|line| {
                        let own = line.own;
                        let bubble = row![
                            text(format!("{}: {}", line.who, line.content)).size(16),
                            text(format_timestamp(&line.created_at))
                                .size(12)
                                .style(Color::from_rgb(0.5, 0.5, 0.5)),
                        ]
                        .spacing(5)
                        .align_items(Alignment::Center);

                        container(bubble)
                            .padding(10)
                            .width(Length::Shrink)
                            .max_width(400)
                            .style(move |_theme: &Theme| container::Appearance {
                                background: Some(Background::Color(if own {
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
                            })
                            .align_x(if own { Horizontal::Right } else { Horizontal::Left })
                            .into()
                    })
                    .collect::<Vec<_>>(),
            )
            .spacing(10)
            .padding(10)
            .width(Length::Fill),
        )
        .height(Length::Fill)
        .id(self.scroll_id.clone());

        let send_bar = row![
            text_input("Message", &self.message_input)
                .on_input(AppMessage::MessageInputChanged)
                .on_submit(AppMessage::Send)
                .padding(10)
                .width(Length::Fill),
            button("Send").on_press(AppMessage::Send).padding(10),
        ]
        .spacing(10);

        let conversation = if self.session.selected_peer().is_some() {
            column![transcript, send_bar].spacing(10)
        } else {
            column![text("Select a user to start chatting").size(20)]
        }
        .width(Length::Fill)
        .height(Length::Fill);

        let status = text(&self.status).size(16);

        container(
            column![
                header,
                row![roster, conversation].spacing(20).height(Length::Fill),
                status
            ]
            .spacing(20)
            .padding(20),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    fn view_about(&self) -> Element<AppMessage> {
        container(
            column![
                text("Simple Chat").size(30),
                text(
                    "Private one-to-one chat between registered users. \
                     Messages persist in a local SQLite database."
                )
                .size(16),
                button("Back").on_press(AppMessage::LeaveAbout).padding(10),
            ]
            .spacing(20)
            .align_items(Alignment::Center),
        )
        .center_x()
        .center_y()
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }
}

/// Render the store's UTC `created_at` string in local time, collapsing
/// today's and yesterday's dates. Falls back to the raw string if it does not
/// parse.
fn format_timestamp(created_at: &str) -> String {
    let Ok(naive) = NaiveDateTime::parse_from_str(created_at, "%Y-%m-%d %H:%M:%S") else {
        return created_at.to_string();
    };
    let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
    let local: DateTime<Local> = utc.with_timezone(&Local);
    let today = Local::now().date_naive();
    let message_date = local.date_naive();

    if message_date == today {
        local.format("%I:%M %p").to_string()
    } else if (today - message_date).num_days() == 1 {
        format!("Yesterday, {}", local.format("%I:%M %p"))
    } else {
        local.format("%b %d, %I:%M %p").to_string()
    }
}
