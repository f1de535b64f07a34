//! # Connection Session
//!
//! The protocol state machine behind one `/game/` connection. A session is a plain
//! Tokio task that is fed client frames through an inbox channel and pushes
//! [`ServerMessage`]s into an outbox channel; the WebSocket actor in `websocket.rs`
//! only moves frames between the socket and these channels.
//!
//! ## States:
//! ```text
//!            create_room / join_room        game record appears / host starts
//! UNJOINED ───────────────────────────▶ LOBBY ────────────────────────▶ IN_GAME
//!    ▲                                   │  ▲                               │
//!    └──── leave_room / room deleted ────┘  └──── game record deleted ──────┘
//!                                             (game_summary sent)
//! ```
//!
//! ## Event Flow:
//! While in a room the session subscribes to the room record and the room's game
//! record. Store changes arrive as events on the session's own channel and
//! are handled one at a time, interleaved with client frames, so all session state
//! is owned by a single task and needs no locking.
//!
//! ## Teardown:
//! However the connection ends, the session drops its subscriptions, stops and
//! ends a game whose scheduler it owns, and leaves its room. Losing the room while
//! owning a running game ends that game the same way.

use crate::error::{GameError, GameResult};
use crate::events::Subscription;
use crate::game::{rotation_index, Game, PlayerId, Room, RoomCode, RoundScheduler, StartOutcome};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Where a session stands in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unjoined,
    Lobby,
    InGame,
}

/// A change to one of the records the session follows.
#[derive(Debug)]
struct SessionEvent {
    /// Which set of subscriptions produced the event.
    generation: u64,
    change: RecordChange,
}

#[derive(Debug)]
enum RecordChange {
    Room(Option<Room>),
    Game(Option<Game>),
}

pub struct ConnectionSession {
    player_id: PlayerId,
    state: AppState,
    outbox: mpsc::UnboundedSender<ServerMessage>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    room: Option<Room>,
    game: Option<Game>,
    /// Bumped whenever subscriptions are replaced; events of older ones are ignored.
    generation: u64,
    subscriptions: Vec<Subscription>,
    scheduler: Option<RoundScheduler>,
}

impl ConnectionSession {
    pub fn new(state: AppState, outbox: mpsc::UnboundedSender<ServerMessage>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            player_id: uuid::Uuid::new_v4().to_string(),
            state,
            outbox,
            events_tx,
            events_rx,
            room: None,
            game: None,
            generation: 0,
            subscriptions: Vec::new(),
            scheduler: None,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.room, &self.game) {
            (None, _) => SessionPhase::Unjoined,
            (Some(_), None) => SessionPhase::Lobby,
            (Some(_), Some(_)) => SessionPhase::InGame,
        }
    }

    /// Serve the connection until the inbox closes or an internal error occurs,
    /// then tear the session down.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<String>) -> GameResult<()> {
        info!(player = %self.player_id, "session started");
        let result = self.serve(&mut inbox).await;
        if let Err(e) = &result {
            error!(player = %self.player_id, "session aborted: {}", e);
        }
        self.teardown();
        result
    }

    async fn serve(&mut self, inbox: &mut mpsc::UnboundedReceiver<String>) -> GameResult<()> {
        loop {
            tokio::select! {
                frame = inbox.recv() => match frame {
                    Some(text) => self.handle_frame(&text).await?,
                    None => return Ok(()),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await?,
            }
        }
    }

    /// Handle one client frame. Recoverable errors become `error` messages.
    async fn handle_frame(&mut self, text: &str) -> GameResult<()> {
        let outcome = match ClientMessage::parse(text) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => Err(e),
        };

        match outcome {
            Err(e) if e.is_recoverable() => {
                debug!(player = %self.player_id, phase = ?self.phase(), "request rejected: {}", e);
                self.state.record_protocol_error();
                self.send(ServerMessage::error(&e));
                Ok(())
            }
            other => other,
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> GameResult<()> {
        match (self.phase(), message) {
            (SessionPhase::Unjoined, ClientMessage::CreateRoom { player_name }) => self.create_room(&player_name),
            (SessionPhase::Unjoined, ClientMessage::JoinRoom { room_id, player_name }) => {
                self.join_room(&room_id, &player_name)
            }
            (SessionPhase::Unjoined, _) => Err(GameError::no_room_joined()),

            (SessionPhase::Lobby, ClientMessage::StartGame) => self.start_game().await,
            (SessionPhase::Lobby, ClientMessage::LeaveRoom) => self.leave_room(),

            (SessionPhase::InGame, ClientMessage::UploadFile { round_number, file_data }) => {
                self.upload_file(round_number, &file_data).await
            }

            (SessionPhase::Lobby, _) | (SessionPhase::InGame, _) => Err(GameError::invalid_action()),
        }
    }

    fn create_room(&mut self, player_name: &str) -> GameResult<()> {
        let room = self.state.rooms.create_room(&self.player_id, player_name)?;
        self.state.record_room_created();
        self.enter_room(room.clone());
        self.send(ServerMessage::RoomCreated { room });
        Ok(())
    }

    fn join_room(&mut self, code: &RoomCode, player_name: &str) -> GameResult<()> {
        let room = self
            .state
            .rooms
            .add_player(code, &self.player_id, player_name)?
            .ok_or_else(GameError::room_not_found)?;

        self.enter_room(room.clone());
        self.send(ServerMessage::RoomJoined {
            room,
            player_id: self.player_id.clone(),
        });
        Ok(())
    }

    async fn start_game(&mut self) -> GameResult<()> {
        let code = self.current_code()?;
        let room = self.state.rooms.get_room(&code)?.ok_or_else(GameError::room_not_found)?;

        if !room.is_host(&self.player_id) {
            return Err(GameError::Authorization("Only the host can start the game".to_string()));
        }
        if room.player_count() < 2 {
            return Err(GameError::Precondition("At least 2 players are required".to_string()));
        }

        let game = match self.state.games.start_game(&code)? {
            StartOutcome::Started(game) => game,
            StartOutcome::RoomMissing => return Err(GameError::room_not_found()),
            StartOutcome::AlreadyRunning => {
                return Err(GameError::Precondition("Game already started".to_string()))
            }
        };

        self.state.vault.clear_room(&code);
        let round_duration = self.state.get_config().round_duration();
        self.scheduler = Some(RoundScheduler::start(
            self.state.games.clone(),
            self.state.rooms.clone(),
            &game,
            round_duration,
        ));
        self.state.record_game_started();
        info!(room = %code, player = %self.player_id, players = room.player_count(), "host started the game");

        // The host is in the game from here on; its own round 1 notification is a duplicate.
        self.game = Some(game.clone());
        self.send(ServerMessage::GameStarted);
        self.send_round(&game).await
    }

    fn leave_room(&mut self) -> GameResult<()> {
        let code = self.current_code()?;
        self.state.rooms.remove_player(&code, &self.player_id)?;
        self.leave_locally();
        info!(room = %code, player = %self.player_id, "player left room");
        self.send(ServerMessage::RoomLeft);
        Ok(())
    }

    async fn upload_file(&mut self, round_number: u32, file_data: &str) -> GameResult<()> {
        let code = self.current_code()?;
        let audio = STANDARD
            .decode(file_data.as_bytes())
            .map_err(|_| GameError::Validation("Invalid file data".to_string()))?;

        self.state
            .vault
            .save_round_file(&code, round_number, &self.player_id, audio)
            .await?;
        self.state.record_file_uploaded();
        Ok(())
    }

    async fn handle_event(&mut self, event: SessionEvent) -> GameResult<()> {
        if event.generation != self.generation || self.room.is_none() {
            return Ok(());
        }

        match event.change {
            RecordChange::Room(Some(room)) => {
                self.room = Some(room.clone());
                self.send(ServerMessage::RoomUpdated { room });
            }
            RecordChange::Room(None) => {
                warn!(player = %self.player_id, "room deleted under session");
                self.leave_locally();
                self.send(ServerMessage::RoomLeft);
            }
            RecordChange::Game(Some(game)) => {
                let new_round = self
                    .game
                    .as_ref()
                    .map_or(true, |current| current.epoch != game.epoch || current.round != game.round);
                self.game = Some(game.clone());
                if new_round {
                    self.send_round(&game).await?;
                }
            }
            RecordChange::Game(None) => {
                if self.game.take().is_some() {
                    self.send_summary().await?;
                }
            }
        }
        Ok(())
    }

    /// Tell the player the round is live, with the recording they should answer.
    async fn send_round(&self, game: &Game) -> GameResult<()> {
        let audio = match self.author_of(game) {
            Some(author) => self
                .state
                .vault
                .get_round_file(&game.room_code, game.round - 1, &author)
                .await?
                .map(|bytes| STANDARD.encode(bytes)),
            None => None,
        };

        debug!(
            room = %game.room_code,
            player = %self.player_id,
            round = game.round,
            has_audio = audio.is_some(),
            "round started"
        );
        self.send(ServerMessage::GameRound {
            round_number: game.round,
            audio,
        });
        Ok(())
    }

    /// The player whose previous-round recording this session receives.
    /// `None` in round 1, which always starts from a fresh prompt.
    fn author_of(&self, game: &Game) -> Option<PlayerId> {
        if game.round <= 1 {
            return None;
        }
        let room = self.room.as_ref()?;
        let seat = room.index_of(&self.player_id)?;
        let author = rotation_index(seat, game.round, room.player_count())?;
        room.player_ids.get(author).cloned()
    }

    async fn send_summary(&mut self) -> GameResult<()> {
        let Some(room) = self.room.clone() else {
            return Ok(());
        };
        // The game ended on its own; the timer is done.
        self.scheduler = None;

        let files = self.state.vault.get_all_files(&room).await?;
        info!(room = %room.code, player = %self.player_id, "game over, sending summary");
        self.send(ServerMessage::GameSummary { files });
        Ok(())
    }

    fn enter_room(&mut self, room: Room) {
        self.generation += 1;
        let generation = self.generation;
        let code = room.code.clone();

        let room_tx = self.events_tx.clone();
        let room_events = self.state.events.subscribe(Room::key(&code), move |room: Option<Room>| {
            let _ = room_tx.send(SessionEvent {
                generation,
                change: RecordChange::Room(room),
            });
        });

        let game_tx = self.events_tx.clone();
        let game_events = self.state.events.subscribe(Game::key(&code), move |game: Option<Game>| {
            let _ = game_tx.send(SessionEvent {
                generation,
                change: RecordChange::Game(game),
            });
        });

        self.subscriptions = vec![room_events, game_events];
        self.room = Some(room);
        self.game = None;
    }

    /// Forget the room on this side: subscriptions, game and timer.
    fn leave_locally(&mut self) {
        self.generation += 1;
        self.subscriptions.clear();
        self.abandon_game();
        self.room = None;
        self.game = None;
    }

    /// Stop the round timer this session owns. A game whose timer was still running
    /// is ended (epoch-checked) so the remaining players get their summary.
    fn abandon_game(&mut self) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };
        if scheduler.is_finished() {
            return;
        }

        scheduler.cancel();
        match self.state.games.end_game(scheduler.room_code(), Some(scheduler.epoch())) {
            Ok(true) => info!(room = %scheduler.room_code(), player = %self.player_id, "game owner gone, game ended early"),
            Ok(false) => {}
            Err(e) => error!(room = %scheduler.room_code(), "failed to end abandoned game: {:#}", e),
        }
    }

    fn current_code(&self) -> GameResult<RoomCode> {
        self.room
            .as_ref()
            .map(|room| room.code.clone())
            .ok_or_else(GameError::no_room_joined)
    }

    fn send(&self, message: ServerMessage) {
        if self.outbox.send(message).is_err() {
            debug!(player = %self.player_id, "outbox closed, dropping message");
        }
    }

    fn teardown(&mut self) {
        self.subscriptions.clear();
        self.abandon_game();

        if let Some(room) = self.room.take() {
            if let Err(e) = self.state.rooms.remove_player(&room.code, &self.player_id) {
                error!(room = %room.code, player = %self.player_id, "failed to remove player on disconnect: {:#}", e);
            }
        }
        self.game = None;
        info!(player = %self.player_id, "session closed");
    }
}
