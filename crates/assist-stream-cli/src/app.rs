//! Application state.
//!
//! [`App`] wraps the [`ChatClient`] with the state that only the terminal
//! cares about: the input line, scroll position, status text and the spinner
//! frame. Everything about the conversation itself is read from the client's
//! session view at render time.

use assist_stream_core::{ChatClient, Phase, SendOutcome, TransportEvent};

/// Spinner frames shown while a reply is streaming.
const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Application state.
pub struct App {
    /// Chat client (session + connection).
    pub client: ChatClient,
    /// Current input buffer.
    pub input: String,
    /// Cursor position in input, in characters.
    pub cursor_position: usize,
    /// Lines scrolled up from the bottom of the chat.
    pub chat_scroll: usize,
    /// Status message to display.
    pub status_message: Option<String>,
    /// Error message to display.
    pub error_message: Option<String>,
    /// Whether the app should quit.
    pub should_quit: bool,
    /// Animation frame counter for the spinner.
    pub animation_frame: usize,
}

impl App {
    /// Create a new application around a client.
    #[must_use]
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            input: String::new(),
            cursor_position: 0,
            chat_scroll: 0,
            status_message: None,
            error_message: None,
            should_quit: false,
            animation_frame: 0,
        }
    }

    /// Tick the animation frame (call on each render).
    pub fn tick_animation(&mut self) {
        self.animation_frame = self.animation_frame.wrapping_add(1);
    }

    /// Current spinner frame.
    #[must_use]
    pub fn spinner_char(&self) -> &'static str {
        SPINNER[self.animation_frame % SPINNER.len()]
    }

    /// Check if the UI needs high-frequency redraws.
    #[must_use]
    pub fn needs_immediate_redraw(&self) -> bool {
        self.client.view().typing || self.client.phase() == Phase::Connecting
    }

    /// Set the status message (also clears any error).
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.error_message = None;
    }

    /// Set the error message.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Clear the error message.
    pub fn clear_error(&mut self) {
        self.error_message = None;
    }

    // =========================================================================
    // Chat Scrolling
    // =========================================================================

    /// Scroll chat up (view older messages).
    pub fn scroll_chat_up(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_add(amount);
    }

    /// Scroll chat down (view newer messages).
    pub fn scroll_chat_down(&mut self, amount: usize) {
        self.chat_scroll = self.chat_scroll.saturating_sub(amount);
    }

    // =========================================================================
    // Input Handling
    // =========================================================================

    fn byte_index(&self, position: usize) -> usize {
        self.input
            .char_indices()
            .nth(position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn input_len(&self) -> usize {
        self.input.chars().count()
    }

    /// Insert a character at the cursor position.
    pub fn insert_char(&mut self, c: char) {
        let index = self.byte_index(self.cursor_position);
        self.input.insert(index, c);
        self.cursor_position += 1;
    }

    /// Delete the character before the cursor.
    pub fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let index = self.byte_index(self.cursor_position);
            self.input.remove(index);
        }
    }

    /// Delete the character at the cursor.
    pub fn delete_char_forward(&mut self) {
        if self.cursor_position < self.input_len() {
            let index = self.byte_index(self.cursor_position);
            self.input.remove(index);
        }
    }

    /// Delete back to the start of the previous word.
    pub fn delete_word(&mut self) {
        while self.cursor_position > 0 {
            self.delete_char();
            if self.cursor_position == 0 {
                break;
            }
            let prev = self.input.chars().nth(self.cursor_position - 1);
            if prev == Some(' ') {
                break;
            }
        }
    }

    /// Move cursor left.
    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    /// Move cursor right.
    pub fn move_cursor_right(&mut self) {
        if self.cursor_position < self.input_len() {
            self.cursor_position += 1;
        }
    }

    /// Move cursor to the start.
    pub fn move_cursor_start(&mut self) {
        self.cursor_position = 0;
    }

    /// Move cursor to the end.
    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.input_len();
    }

    /// Clear the input.
    pub fn clear_input(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
    }

    // =========================================================================
    // Chat Actions
    // =========================================================================

    /// Send the input line. The input is kept if the socket is not open.
    pub fn submit_input(&mut self) {
        match self.client.send(&self.input) {
            SendOutcome::Sent(_) => {
                self.clear_input();
                self.clear_error();
                self.chat_scroll = 0;
            }
            SendOutcome::Empty => {}
            SendOutcome::NotConnected => {
                self.set_error("Not connected; message not sent");
            }
            SendOutcome::QueueFull => {
                self.set_error("Connection busy; message not sent");
            }
        }
    }

    /// Start a fresh conversation.
    pub fn new_conversation(&mut self) {
        self.client.new_conversation();
        self.chat_scroll = 0;
        self.set_status("New conversation");
    }

    /// Drop the current socket and connect again.
    pub fn reconnect(&mut self) {
        match self.client.reconnect() {
            Ok(()) => self.set_status("Reconnecting..."),
            Err(e) => self.set_error(format!("Reconnect failed: {e}")),
        }
    }

    /// Close the connection before exit.
    pub fn shutdown(&mut self) {
        self.client.shutdown();
    }

    /// Handle one transport event.
    ///
    /// Returns `true` if the UI should be redrawn.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        let before = self.client.phase();
        let changed = self.client.handle_event(event);
        let after = self.client.phase();

        if before != after {
            match after {
                Phase::Open => self.set_status("Connected"),
                Phase::Connecting => self.set_status("Connecting..."),
                Phase::Closed => self.set_error("Connection lost; retrying"),
            }
        }

        if changed {
            // Follow the stream.
            self.chat_scroll = 0;
        }
        changed
    }
}
