use crate::display::render;
use crate::input::{parse_command, Command, HELP};
use crate::session::ClientSession;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_server_message, encode_client_message, timestamp_ms, ClientMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub struct Client {
    server_url: String,
    session: ClientSession,
    resume: bool,
}

impl Client {
    pub fn new(server_url: &str, session: ClientSession, resume: bool) -> Self {
        Client {
            server_url: server_url.to_string(),
            session,
            resume,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Connects and runs until the user quits, stdin closes or the server
    /// goes away.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_url);
        let (ws_stream, _) = connect_async(self.server_url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        println!("Connected as {}. Type /help for commands.", self.session.player_name);

        let mut first_requests = vec![ClientMessage::GetAvailableRooms];
        if self.resume {
            if let Some(request) = self.session.resume_request(timestamp_ms()) {
                info!("Resuming cached session");
                first_requests.insert(0, request);
            }
        }
        for request in first_requests {
            self.session.on_request(&request);
            ws_sender
                .send(Message::Text(encode_client_message(&request)?))
                .await?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => match decode_server_message(&text) {
                            Ok(message) => {
                                self.session.on_event(&message);
                                println!("{}", render(&message));
                            }
                            Err(e) => warn!("Unreadable message from server: {}", e),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            println!("Server closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("Connection error: {}", e);
                            break;
                        }
                    }
                },

                line = lines.next_line() => {
                    let line = match line? {
                        Some(line) => line,
                        None => break,
                    };
                    let parsed = parse_command(
                        &line,
                        &self.session.player_name,
                        self.session.room_id.as_deref(),
                    );
                    match parsed {
                        Ok(Some(Command::Send(request))) => {
                            debug!("Sending {}", request.kind());
                            self.session.on_request(&request);
                            ws_sender
                                .send(Message::Text(encode_client_message(&request)?))
                                .await?;
                        }
                        Ok(Some(Command::Help)) => println!("{}", HELP),
                        Ok(Some(Command::Quit)) => break,
                        Ok(None) => {}
                        Err(e) => println!("{}", e),
                    }
                },
            }
        }

        let _ = ws_sender.close().await;
        Ok(())
    }
}
