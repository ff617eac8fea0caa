use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::conversation::{ConversationView, Effect};
use crate::directory::ContactDirectory;
use crate::ui::chat_view::render_thread;
use crate::ui::sidebar::render_contacts;

const THREAD_TAIL: usize = 20;

const HELP: &str = "\
/contacts        show the contact list
/search <term>   filter contacts by name or number (empty clears)
/open <n>        open the n-th contact of the list
/close           close the open conversation
/quit            exit
anything else is sent to the open conversation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Contacts,
    Search(String),
    Open(usize),
    Close,
    Help,
    Quit,
    Send(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest.trim(), ""),
        };
        match name {
            "contacts" | "c" => Command::Contacts,
            "search" | "s" => Command::Search(arg.to_string()),
            "open" | "o" => match arg.parse::<usize>() {
                Ok(n) if n > 0 => Command::Open(n),
                _ => Command::Unknown(line.to_string()),
            },
            "close" => Command::Close,
            "help" | "h" => Command::Help,
            "quit" | "q" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

struct Screen {
    directory: ContactDirectory,
    view: ConversationView,
    search: String,
}

impl Screen {
    fn show_contacts(&self) {
        let visible = self.directory.filter(&self.search);
        let active = self.view.contact().map(|c| c.id.as_str());
        println!("{}", render_contacts(&visible, active, &self.search));
    }

    fn show_thread(&self) {
        if let Some(contact) = self.view.contact() {
            println!("{}", render_thread(contact, self.view.messages(), THREAD_TAIL));
        }
    }

    fn flush_effects(&mut self) {
        let mut scrolled = false;
        for effect in self.view.take_effects() {
            match effect {
                Effect::ScrollToBottom => scrolled = true,
                Effect::Alert(message) => eprintln!("! {}", message),
            }
        }
        if scrolled {
            self.show_thread();
        }
    }

    /// Returns `false` once the user asked to quit.
    fn command(&mut self, command: Command) -> bool {
        match command {
            Command::Contacts => self.show_contacts(),
            Command::Search(term) => {
                self.search = term;
                self.show_contacts();
            }
            Command::Open(n) => {
                let picked = self.directory.filter(&self.search).get(n - 1).map(|c| (*c).clone());
                match picked {
                    Some(contact) => {
                        self.view.select(contact);
                        self.show_thread();
                    }
                    None => eprintln!("! no contact #{}", n),
                }
            }
            Command::Close => self.view.close(),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
            Command::Send(text) => {
                if self.view.contact().is_none() {
                    eprintln!("! open a conversation first (/open <n>)");
                } else {
                    self.view.send(&text);
                }
            }
            Command::Unknown(line) => eprintln!("! unknown command `{}`, try /help", line),
        }
        true
    }
}

/// Terminal event loop: keyboard input, contact changes and conversation
/// events are handled one at a time on this task.
pub async fn run(directory: ContactDirectory, view: ConversationView) -> anyhow::Result<()> {
    let mut screen = Screen {
        directory,
        view,
        search: String::new(),
    };
    screen.directory.load().await;
    screen.directory.watch().await;
    screen.show_contacts();
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !screen.command(Command::parse(&line)) {
                    break;
                }
            }
            _ = screen.directory.next_change() => {
                screen.directory.load().await;
                if screen.view.contact().is_none() {
                    screen.show_contacts();
                }
            }
            event = screen.view.next_event() => screen.view.handle(event),
        }
        screen.flush_effects();
    }

    info!("shutting down");
    screen.view.close();
    screen.directory.unwatch();
    Ok(())
}
