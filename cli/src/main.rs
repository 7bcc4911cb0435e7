extern crate accdb;
extern crate clap;

use clap::{App, Arg, ArgMatches, SubCommand};

use accdb::{Database, Error, DOESNT_EXIST};

/// Default key size (bytes) used by the CLI's single ad-hoc index when the
/// caller does not override it with `--key-size`. Real callers (the
/// accounter schema this crate backs) register their own indexes with
/// sizes matching their key types; the CLI has no schema of its own, so it
/// picks one fixed size and pads/truncates every key to it.
const DEFAULT_KEY_SIZE: usize = 16;

fn key_size(matches: &ArgMatches) -> usize {
	matches
		.value_of("KEY_SIZE")
		.and_then(|s| s.parse().ok())
		.unwrap_or(DEFAULT_KEY_SIZE)
}

fn index_id(matches: &ArgMatches) -> u8 {
	matches.value_of("INDEX").and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Pack a caller-supplied key string into the length-prefixed form the
/// crate expects, padding with zero bytes or truncating so it matches the
/// index's declared `key_size` exactly.
fn encode_key(raw: &str, key_size: usize) -> Result<Vec<u8>, Error> {
	if key_size > 255 {
		return Err(accdb::ErrorKind::BadArgument("--key-size must fit in a byte".into()).into());
	}

	let mut bytes = raw.as_bytes().to_vec();
	bytes.resize(key_size, 0);

	let mut buf = Vec::with_capacity(1 + key_size);
	buf.push(key_size as u8);
	buf.extend_from_slice(&bytes);
	Ok(buf)
}

fn do_get(db: &str, key: &str, index: u8, key_size: usize) -> Result<(), Error> {
	let mut db = Database::open(db)?;
	db.register_index(index, key_size)?;

	let tx = db.begin();
	let encoded = encode_key(key, key_size)?;

	match db.read(&tx, index, &encoded) {
		Ok(value) => println!("value: {:?}", value),
		Err(ref err) if matches_not_found(err) => println!("value not found."),
		Err(err) => println!("no value found for this key with error: {}.", err),
	}
	Ok(())
}

fn do_insert(db: &str, key: &str, value: &str, index: u8, key_size: usize) -> Result<(), Error> {
	let mut db = Database::create(db)?;
	db.register_index(index, key_size)?;

	let encoded = encode_key(key, key_size)?;
	let mut tx = db.begin();
	db.write(&mut tx, index, &encoded, value.as_bytes())?;
	db.commit(tx)?;
	Ok(())
}

fn do_delete(db: &str, key: &str, index: u8, key_size: usize) -> Result<(), Error> {
	let mut db = Database::open(db)?;
	db.register_index(index, key_size)?;

	let encoded = encode_key(key, key_size)?;
	let mut tx = db.begin();
	db.delete(&mut tx, index, &encoded)?;
	db.commit(tx)?;
	Ok(())
}

fn do_len(db: &str, key: &str, index: u8, key_size: usize) -> Result<(), Error> {
	let mut db = Database::open(db)?;
	db.register_index(index, key_size)?;

	let tx = db.begin();
	let encoded = encode_key(key, key_size)?;
	match db.length(&tx, index, &encoded)? {
		DOESNT_EXIST => println!("value not found."),
		len => println!("length: {}", len),
	}
	Ok(())
}

fn matches_not_found(err: &Error) -> bool {
	match *err.kind() {
		accdb::ErrorKind::NotFound => true,
		_ => false,
	}
}

fn key_value_app<'a, 'b>(name: &'b str, about: &'b str, needs_value: bool) -> App<'a, 'b> {
	let mut app = SubCommand::with_name(name)
		.about(about)
		.arg(Arg::with_name("DB").short("d").long("db").takes_value(true).required(true))
		.arg(Arg::with_name("KEY").short("k").long("key").takes_value(true).required(true))
		.arg(Arg::with_name("INDEX").short("i").long("index").takes_value(true))
		.arg(Arg::with_name("KEY_SIZE").long("key-size").takes_value(true));

	if needs_value {
		app = app.arg(Arg::with_name("VALUE").short("v").long("value").takes_value(true).required(true));
	}
	app
}

fn main() {
	let matches = App::new("accdb-cli")
		.version("0.1.0")
		.author("Database designed for wallet/accounter state")
		.about("A simple command line interface for accdb")
		.subcommand(key_value_app("get", "Get value from the specified key in database", false))
		.subcommand(key_value_app("insert", "Insert key/value pair into database", true))
		.subcommand(key_value_app("delete", "Delete key in database", false))
		.subcommand(key_value_app("len", "Print the stored length for a key", false))
		.get_matches();

	let result = match matches.subcommand() {
		("get", Some(m)) => do_get(m.value_of("DB").unwrap(), m.value_of("KEY").unwrap(), index_id(m), key_size(m)),
		("insert", Some(m)) => {
			do_insert(m.value_of("DB").unwrap(), m.value_of("KEY").unwrap(), m.value_of("VALUE").unwrap(), index_id(m), key_size(m))
		},
		("delete", Some(m)) => do_delete(m.value_of("DB").unwrap(), m.value_of("KEY").unwrap(), index_id(m), key_size(m)),
		("len", Some(m)) => do_len(m.value_of("DB").unwrap(), m.value_of("KEY").unwrap(), index_id(m), key_size(m)),
		_ => {
			println!("no subcommand given; run with --help for usage.");
			return;
		},
	};

	if let Err(err) = result {
		eprintln!("accdb-cli: {}", err);
		std::process::exit(1);
	}
}
