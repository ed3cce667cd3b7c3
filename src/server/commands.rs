//! Command dispatch for the wire protocol.
//!
//! Reply conventions: `"<nil>"` for missing values, `"1"`/`"0"` for
//! booleans, decimal text for counts, and one element per line for
//! multi-value replies.

use crate::ds::InsertOption;
use crate::engine::KilnDb;
use crate::error::{Error, Result};

/// Execute one tokenized command against the engine.
pub fn execute(db: &KilnDb, cmd: &str, args: &[String]) -> Result<String> {
    match cmd.to_lowercase().as_str() {
        "ping" => Ok("PONG".to_string()),

        // strings
        "set" => set(db, args),
        "setnx" => set_nx(db, args),
        "get" => get(db, args),
        "getset" => get_set(db, args),
        "append" => append(db, args),
        "strlen" => str_len(db, args),
        "exists" => str_exists(db, args),
        "rem" => str_rem(db, args),
        "prefixscan" => prefix_scan(db, args),
        "rangescan" => range_scan(db, args),
        "expire" => expire(db, args),
        "persist" => persist(db, args),
        "ttl" => ttl(db, args),

        // hashes
        "hset" => hset(db, args),
        "hsetnx" => hset_nx(db, args),
        "hget" => hget(db, args),
        "hgetall" => hget_all(db, args),
        "hdel" => hdel(db, args),
        "hexists" => hexists(db, args),
        "hlen" => hlen(db, args),
        "hkeys" => hkeys(db, args),
        "hvalues" => hvalues(db, args),

        // lists
        "lpush" => lpush(db, args),
        "rpush" => rpush(db, args),
        "lpop" => lpop(db, args),
        "rpop" => rpop(db, args),
        "lindex" => lindex(db, args),
        "lrem" => lrem(db, args),
        "linsert" => linsert(db, args),
        "lset" => lset(db, args),
        "ltrim" => ltrim(db, args),
        "lrange" => lrange(db, args),
        "llen" => llen(db, args),

        // sets
        "sadd" => sadd(db, args),
        "srem" => srem(db, args),
        "sismember" => sis_member(db, args),
        "smove" => smove(db, args),
        "scard" => scard(db, args),
        "smembers" => smembers(db, args),

        // sorted sets
        "zadd" => zadd(db, args),
        "zrem" => zrem(db, args),
        "zscore" => zscore(db, args),
        "zcard" => zcard(db, args),
        "zrange" => zrange(db, args),

        _ => Ok("command not found".to_string()),
    }
}

fn require(args: &[String], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(Error::Syntax);
    }
    Ok(())
}

fn require_at_least(args: &[String], n: usize) -> Result<()> {
    if args.len() < n {
        return Err(Error::Syntax);
    }
    Ok(())
}

fn int_arg(arg: &str) -> Result<i64> {
    arg.parse().map_err(|_| Error::Syntax)
}

fn float_arg(arg: &str) -> Result<f64> {
    arg.parse().map_err(|_| Error::Syntax)
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn value_or_nil(value: Option<Vec<u8>>) -> String {
    match value {
        Some(v) => text(&v),
        None => "<nil>".to_string(),
    }
}

fn bool_reply(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

fn lines(values: Vec<Vec<u8>>) -> String {
    values
        .iter()
        .map(|v| text(v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rest_as_bytes(args: &[String]) -> Vec<&[u8]> {
    args.iter().map(|a| a.as_bytes()).collect()
}

// --- strings ---

fn set(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    db.set(args[0].as_bytes(), args[1].as_bytes())?;
    Ok("OK".to_string())
}

fn set_nx(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let set = db.set_nx(args[0].as_bytes(), args[1].as_bytes())?;
    Ok(bool_reply(set))
}

fn get(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    match db.get(args[0].as_bytes()) {
        Ok(value) => Ok(text(&value)),
        Err(Error::KeyNotFound | Error::KeyExpired) => Ok("<nil>".to_string()),
        Err(err) => Err(err),
    }
}

fn get_set(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let old = db.get_set(args[0].as_bytes(), args[1].as_bytes())?;
    Ok(text(&old))
}

fn append(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    db.append(args[0].as_bytes(), args[1].as_bytes())?;
    Ok("OK".to_string())
}

fn str_len(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.str_len(args[0].as_bytes()).to_string())
}

fn str_exists(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(bool_reply(db.str_exists(args[0].as_bytes())))
}

fn str_rem(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    db.str_rem(args[0].as_bytes())?;
    Ok("OK".to_string())
}

fn prefix_scan(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let limit = int_arg(&args[1])?;
    let offset = int_arg(&args[2])?;
    let values = db.prefix_scan(args[0].as_bytes(), limit, offset)?;
    Ok(lines(values))
}

fn range_scan(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let values = db.range_scan(args[0].as_bytes(), args[1].as_bytes())?;
    Ok(lines(values))
}

fn expire(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let seconds = int_arg(&args[1])?;
    if seconds <= 0 {
        return Err(Error::InvalidTtl);
    }
    db.expire(args[0].as_bytes(), seconds as u32)?;
    Ok("OK".to_string())
}

fn persist(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    db.persist(args[0].as_bytes());
    Ok("OK".to_string())
}

fn ttl(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.ttl(args[0].as_bytes()).to_string())
}

// --- hashes ---

fn hset(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let count = db.hset(args[0].as_bytes(), args[1].as_bytes(), args[2].as_bytes())?;
    Ok(count.to_string())
}

fn hset_nx(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let set = db.hset_nx(args[0].as_bytes(), args[1].as_bytes(), args[2].as_bytes())?;
    Ok(bool_reply(set))
}

fn hget(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    Ok(value_or_nil(db.hget(args[0].as_bytes(), args[1].as_bytes())))
}

fn hget_all(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    let mut flat = Vec::new();
    for (field, value) in db.hget_all(args[0].as_bytes()) {
        flat.push(field);
        flat.push(value);
    }
    Ok(lines(flat))
}

fn hdel(db: &KilnDb, args: &[String]) -> Result<String> {
    require_at_least(args, 2)?;
    let fields = rest_as_bytes(&args[1..]);
    let removed = db.hdel(args[0].as_bytes(), &fields)?;
    Ok(removed.to_string())
}

fn hexists(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    Ok(bool_reply(db.hexists(args[0].as_bytes(), args[1].as_bytes())))
}

fn hlen(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.hlen(args[0].as_bytes()).to_string())
}

fn hkeys(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(lines(db.hkeys(args[0].as_bytes())))
}

fn hvalues(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(lines(db.hvalues(args[0].as_bytes())))
}

// --- lists ---

fn lpush(db: &KilnDb, args: &[String]) -> Result<String> {
    require_at_least(args, 2)?;
    let values = rest_as_bytes(&args[1..]);
    let len = db.lpush(args[0].as_bytes(), &values)?;
    Ok(len.to_string())
}

fn rpush(db: &KilnDb, args: &[String]) -> Result<String> {
    require_at_least(args, 2)?;
    let values = rest_as_bytes(&args[1..]);
    let len = db.rpush(args[0].as_bytes(), &values)?;
    Ok(len.to_string())
}

fn lpop(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(value_or_nil(db.lpop(args[0].as_bytes())?))
}

fn rpop(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(value_or_nil(db.rpop(args[0].as_bytes())?))
}

fn lindex(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let index = int_arg(&args[1])?;
    Ok(value_or_nil(db.lindex(args[0].as_bytes(), index)))
}

fn lrem(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let count = int_arg(&args[2])?;
    let removed = db.lrem(args[0].as_bytes(), args[1].as_bytes(), count)?;
    Ok(removed.to_string())
}

fn linsert(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 4)?;
    let option = match args[1].to_lowercase().as_str() {
        "before" => InsertOption::Before,
        "after" => InsertOption::After,
        _ => return Err(Error::Syntax),
    };
    let len = db.linsert(
        args[0].as_bytes(),
        option,
        args[2].as_bytes(),
        args[3].as_bytes(),
    )?;
    Ok(match len {
        Some(n) => n.to_string(),
        None => "-1".to_string(),
    })
}

fn lset(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let index = int_arg(&args[1])?;
    let set = db.lset(args[0].as_bytes(), index, args[2].as_bytes())?;
    Ok(bool_reply(set))
}

fn ltrim(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let start = int_arg(&args[1])?;
    let end = int_arg(&args[2])?;
    db.ltrim(args[0].as_bytes(), start, end)?;
    Ok("OK".to_string())
}

fn lrange(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let start = int_arg(&args[1])?;
    let end = int_arg(&args[2])?;
    Ok(lines(db.lrange(args[0].as_bytes(), start, end)))
}

fn llen(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.llen(args[0].as_bytes()).to_string())
}

// --- sets ---

fn sadd(db: &KilnDb, args: &[String]) -> Result<String> {
    require_at_least(args, 2)?;
    let members = rest_as_bytes(&args[1..]);
    let card = db.sadd(args[0].as_bytes(), &members)?;
    Ok(card.to_string())
}

fn srem(db: &KilnDb, args: &[String]) -> Result<String> {
    require_at_least(args, 2)?;
    let members = rest_as_bytes(&args[1..]);
    let removed = db.srem(args[0].as_bytes(), &members)?;
    Ok(removed.to_string())
}

fn sis_member(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    Ok(bool_reply(db.sis_member(args[0].as_bytes(), args[1].as_bytes())))
}

fn smove(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let moved = db.smove(args[0].as_bytes(), args[1].as_bytes(), args[2].as_bytes())?;
    Ok(bool_reply(moved))
}

fn scard(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.scard(args[0].as_bytes()).to_string())
}

fn smembers(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(lines(db.smembers(args[0].as_bytes())))
}

// --- sorted sets ---

fn zadd(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let score = float_arg(&args[1])?;
    db.zadd(args[0].as_bytes(), score, args[2].as_bytes())?;
    Ok("OK".to_string())
}

fn zrem(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    let removed = db.zrem(args[0].as_bytes(), args[1].as_bytes())?;
    Ok(bool_reply(removed))
}

fn zscore(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 2)?;
    match db.zscore(args[0].as_bytes(), args[1].as_bytes()) {
        Some(score) => Ok(score.to_string()),
        None => Ok("<nil>".to_string()),
    }
}

fn zcard(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 1)?;
    Ok(db.zcard(args[0].as_bytes()).to_string())
}

fn zrange(db: &KilnDb, args: &[String]) -> Result<String> {
    require(args, 3)?;
    let start = int_arg(&args[1])?;
    let end = int_arg(&args[2])?;
    let mut flat = Vec::new();
    for (member, score) in db.zrange(args[0].as_bytes(), start, end) {
        flat.push(member);
        flat.push(score.to_string().into_bytes());
    }
    Ok(lines(flat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> KilnDb {
        KilnDb::open(Config::new(dir.path())).expect("open db")
    }

    fn run(db: &KilnDb, line: &str) -> String {
        let tokens = crate::server::tokenize(line);
        let (cmd, args) = tokens.split_first().expect("non-empty command");
        match execute(db, cmd, args) {
            Ok(reply) => reply,
            Err(err) => format!("err: {err}"),
        }
    }

    #[test]
    fn test_string_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(run(&db, "set foo bar"), "OK");
        assert_eq!(run(&db, "get foo"), "bar");
        assert_eq!(run(&db, "get missing"), "<nil>");
        assert_eq!(run(&db, "setnx foo other"), "0");
        assert_eq!(run(&db, "getset foo baz"), "bar");
        assert_eq!(run(&db, "append foo !"), "OK");
        assert_eq!(run(&db, "strlen foo"), "4");
        assert_eq!(run(&db, "exists foo"), "1");
        assert_eq!(run(&db, "rem foo"), "OK");
        assert_eq!(run(&db, "exists foo"), "0");
        assert_eq!(run(&db, "set foo"), "err: incorrect number of arguments");
    }

    #[test]
    fn test_scan_and_ttl_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        run(&db, "set user:1 alice");
        run(&db, "set user:2 bob");
        assert_eq!(run(&db, "prefixscan user: -1 0"), "alice\nbob");
        assert_eq!(run(&db, "rangescan user:1 user:2"), "alice\nbob");

        assert_eq!(run(&db, "expire user:1 100"), "OK");
        let ttl: u32 = run(&db, "ttl user:1").parse().expect("numeric ttl");
        assert!(ttl > 0 && ttl <= 100);
        assert_eq!(run(&db, "persist user:1"), "OK");
        assert_eq!(run(&db, "ttl user:1"), "0");
        assert_eq!(run(&db, "expire user:1 0"), "err: invalid ttl");
    }

    #[test]
    fn test_hash_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(run(&db, "hset h f v"), "1");
        assert_eq!(run(&db, "hget h f"), "v");
        assert_eq!(run(&db, "hget h nope"), "<nil>");
        assert_eq!(run(&db, "hsetnx h f other"), "0");
        assert_eq!(run(&db, "hexists h f"), "1");
        assert_eq!(run(&db, "hlen h"), "1");
        assert_eq!(run(&db, "hkeys h"), "f");
        assert_eq!(run(&db, "hvalues h"), "v");
        assert_eq!(run(&db, "hgetall h"), "f\nv");
        assert_eq!(run(&db, "hdel h f"), "1");
        assert_eq!(run(&db, "hlen h"), "0");
    }

    #[test]
    fn test_list_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(run(&db, "rpush l a b c"), "3");
        assert_eq!(run(&db, "lrange l 0 -1"), "a\nb\nc");
        assert_eq!(run(&db, "lindex l 1"), "b");
        assert_eq!(run(&db, "linsert l before b x"), "4");
        assert_eq!(run(&db, "linsert l before missing x"), "-1");
        assert_eq!(run(&db, "lset l 0 A"), "1");
        assert_eq!(run(&db, "lrem l x 0"), "1");
        assert_eq!(run(&db, "lpop l"), "A");
        assert_eq!(run(&db, "rpop l"), "c");
        assert_eq!(run(&db, "llen l"), "1");
        assert_eq!(run(&db, "ltrim l 0 -1"), "OK");
    }

    #[test]
    fn test_set_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(run(&db, "sadd s a b"), "2");
        assert_eq!(run(&db, "sismember s a"), "1");
        assert_eq!(run(&db, "smove s t a"), "1");
        assert_eq!(run(&db, "sismember t a"), "1");
        assert_eq!(run(&db, "srem s b"), "1");
        assert_eq!(run(&db, "scard s"), "0");
    }

    #[test]
    fn test_zset_commands() {
        let dir = TempDir::new().expect("temp dir");
        let db = open_db(&dir);

        assert_eq!(run(&db, "zadd z 1.5 a"), "OK");
        assert_eq!(run(&db, "zadd z -2 b"), "OK");
        assert_eq!(run(&db, "zscore z a"), "1.5");
        assert_eq!(run(&db, "zscore z missing"), "<nil>");
        assert_eq!(run(&db, "zcard z"), "2");
        assert_eq!(run(&db, "zrange z 0 -1"), "b\n-2\na\n1.5");
        assert_eq!(run(&db, "zrem z a"), "1");
        assert_eq!(run(&db, "zcard z"), "1");
    }
}
