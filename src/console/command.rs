use crate::core::Favorite;

pub const USAGE: &str = "\
Commands:
  path <file-or-url>                    video file or http(s) link to stream
  url <endpoint>                        server URL (RTMP/RTMPS)
  key <credential>                      stream key
  use <favorite>                        fill url and key from a favorite
  start                                 start streaming
  stop                                  stop streaming
  status                                show the current session
  favs                                  list favorites
  fav add <name> <url> <key>            add a favorite
  fav edit <original> <name> <url> <key>
                                        replace a favorite
  fav rm <name>                         remove a favorite
  history                               show the full event log
  help                                  show this help
  quit                                  stop streaming and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Path(String),
    Url(String),
    Key(String),
    Use(String),
    Start,
    Stop,
    Status,
    Favorites,
    AddFavorite(Favorite),
    EditFavorite { original: String, favorite: Favorite },
    RemoveFavorite(String),
    History,
    Help,
    Quit,
}

/// Parses one console line. Blank lines yield `Ok(None)`; the error is a usage hint.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        // Paths may contain spaces, so they take the rest of the line.
        "path" => Command::Path(required(rest, "path <file-or-url>")?),
        "url" => Command::Url(required(rest, "url <endpoint>")?),
        "key" => Command::Key(required(rest, "key <credential>")?),
        "use" => Command::Use(required(rest, "use <favorite>")?),
        "start" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "favs" => Command::Favorites,
        "fav" => parse_fav(rest)?,
        "history" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '{}'. Type 'help' for a list.", other)),
    };
    Ok(Some(command))
}

fn parse_fav(rest: &str) -> Result<Command, String> {
    let args: Vec<&str> = rest.split_whitespace().collect();
    match args.as_slice() {
        ["add", name, url, key] => Ok(Command::AddFavorite(Favorite::new(*name, *url, *key))),
        ["edit", original, name, url, key] => Ok(Command::EditFavorite {
            original: original.to_string(),
            favorite: Favorite::new(*name, *url, *key),
        }),
        ["rm", name] | ["remove", name] => Ok(Command::RemoveFavorite(name.to_string())),
        ["add", ..] => Err("Usage: fav add <name> <url> <key>".to_string()),
        ["edit", ..] => Err("Usage: fav edit <original> <name> <url> <key>".to_string()),
        ["rm", ..] | ["remove", ..] => Err("Usage: fav rm <name>".to_string()),
        _ => Err("Usage: fav add|edit|rm ...".to_string()),
    }
}

fn required(value: &str, usage: &str) -> Result<String, String> {
    if value.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(value.to_string())
    }
}
