//! The server-side handshake state machine.
//!
//! [`ServerSession::handshake`] owns the wire for the whole exchange: it
//! negotiates a protocol version, selects (and if necessary unlocks) a
//! module, receives and parses the peer's argument vector, and finishes by
//! sending the capability byte and checksum seed. The sole output of a
//! successful run is a frozen [`TransferConfig`] the transfer phase consumes.
//!
//! Failure handling follows the daemon convention: once module selection has
//! begun, anything the peer did wrong is echoed back as a single
//! `@ERROR: <message>` line and the session ends with
//! [`SessionStatus::Error`]; earlier failures and channel breakdowns
//! propagate to the caller, who closes the connection silently.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use rsyncd_protocol::{
    format_greeting, negotiate, parse_greeting, Charset, ChannelError, CompatFlags,
    DaemonChannel, PeerCapabilities, ProtocolVersion, SessionStatus,
};

use crate::argparse::{ArgParseError, ArgumentParser, OptionSpec, PresencePolicy};
use crate::auth::{self, AuthContext};
use crate::error::HandshakeError;
use crate::module::{Module, ModuleEntry, ModuleProvider, RestrictedModule};

/// Role of this server relative to data flow in the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// The server reads from the module and sends file data to the peer.
    Sender,
    /// The server writes data received from the peer into the module.
    Receiver,
}

/// How the peer wants the file set expanded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FileSelection {
    /// Transfer exactly the named files.
    #[default]
    Exact,
    /// Transfer the named directories without recursing (`--dirs`).
    TransferDirs,
    /// Recurse into directories (`--recursive`).
    Recurse,
}

/// The frozen outcome of a successful handshake.
///
/// Immutable once built; every accessor is a plain read. The transfer phase
/// takes ownership of this value and never talks to the handshake again.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    role: Role,
    file_selection: FileSelection,
    incremental_recurse: bool,
    preserve_devices: bool,
    preserve_specials: bool,
    preserve_links: bool,
    preserve_permissions: bool,
    preserve_times: bool,
    preserve_user: bool,
    preserve_group: bool,
    numeric_ids: bool,
    ignore_times: bool,
    delete: bool,
    safe_file_list: bool,
    verbosity: u32,
    module: Module,
    source_files: Vec<PathBuf>,
    receiver_destination: Option<PathBuf>,
    checksum_seed: [u8; 4],
    charset: Charset,
    protocol_version: ProtocolVersion,
}

impl TransferConfig {
    /// The server's role in the upcoming transfer.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// How the peer asked the file set to be expanded.
    #[must_use]
    pub const fn file_selection(&self) -> FileSelection {
        self.file_selection
    }

    /// Whether incremental recursion is in effect.
    #[must_use]
    pub const fn incremental_recurse(&self) -> bool {
        self.incremental_recurse
    }

    /// Whether device nodes are preserved (`-D`).
    #[must_use]
    pub const fn preserve_devices(&self) -> bool {
        self.preserve_devices
    }

    /// Whether special files are preserved (`-D`, `--specials`).
    #[must_use]
    pub const fn preserve_specials(&self) -> bool {
        self.preserve_specials
    }

    /// Whether symlinks are preserved (`--links`).
    #[must_use]
    pub const fn preserve_links(&self) -> bool {
        self.preserve_links
    }

    /// Whether permissions are preserved (`--perms`).
    #[must_use]
    pub const fn preserve_permissions(&self) -> bool {
        self.preserve_permissions
    }

    /// Whether modification times are preserved (`--times`).
    #[must_use]
    pub const fn preserve_times(&self) -> bool {
        self.preserve_times
    }

    /// Whether owning users are preserved (`--owner`).
    #[must_use]
    pub const fn preserve_user(&self) -> bool {
        self.preserve_user
    }

    /// Whether owning groups are preserved (`--group`).
    #[must_use]
    pub const fn preserve_group(&self) -> bool {
        self.preserve_group
    }

    /// Whether IDs transfer numerically instead of by name (`--numeric-ids`).
    #[must_use]
    pub const fn numeric_ids(&self) -> bool {
        self.numeric_ids
    }

    /// Whether quick-check timestamps are ignored (`--ignore-times`).
    #[must_use]
    pub const fn ignore_times(&self) -> bool {
        self.ignore_times
    }

    /// Whether extraneous destination files are deleted (`--delete`).
    #[must_use]
    pub const fn delete(&self) -> bool {
        self.delete
    }

    /// Whether the peer supports the safe file list.
    #[must_use]
    pub const fn safe_file_list(&self) -> bool {
        self.safe_file_list
    }

    /// Verbosity level requested by the peer (one per `-v`).
    #[must_use]
    pub const fn verbosity(&self) -> u32 {
        self.verbosity
    }

    /// The selected module.
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Module-rooted source paths (Sender role; empty otherwise).
    #[must_use]
    pub fn source_files(&self) -> &[PathBuf] {
        &self.source_files
    }

    /// Module-rooted destination path (Receiver role; `None` otherwise).
    #[must_use]
    pub fn receiver_destination(&self) -> Option<&PathBuf> {
        self.receiver_destination.as_ref()
    }

    /// The per-session checksum seed, stored as the little-endian image of a
    /// random 32-bit value.
    #[must_use]
    pub const fn checksum_seed(&self) -> [u8; 4] {
        self.checksum_seed
    }

    /// The character set the session was negotiated under.
    #[must_use]
    pub const fn charset(&self) -> Charset {
        self.charset
    }

    /// The negotiated protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }
}

/// A finished handshake: terminal status plus, on success, the transfer
/// configuration.
#[derive(Clone, Debug)]
pub struct ServerSession {
    status: SessionStatus,
    protocol_version: Option<ProtocolVersion>,
    error: Option<String>,
    config: Option<TransferConfig>,
}

impl ServerSession {
    /// Drives the complete server handshake over the given channel halves.
    ///
    /// On a clean protocol run the returned session has status
    /// [`SessionStatus::Ok`] and carries the frozen [`TransferConfig`].
    /// Listing mode ends with [`SessionStatus::Exit`] and no configuration.
    /// Peer mistakes after module selection are echoed as `@ERROR:` and end
    /// with [`SessionStatus::Error`]; greeting-phase failures and channel
    /// breakdowns return `Err` instead, and the caller closes the connection.
    pub fn handshake<R, W, M>(
        charset: Charset,
        input: R,
        output: W,
        modules: &M,
    ) -> Result<Self, HandshakeError>
    where
        R: Read,
        W: Write,
        M: ModuleProvider + ?Sized,
    {
        let mut driver = Handshake {
            channel: DaemonChannel::new(input, output),
            charset,
            modules,
            checksum_seed: generate_checksum_seed().map_err(ChannelError::Io)?,
            protocol_version: None,
            module_selected: false,
        };

        let session = match driver.run() {
            Ok(Completed::Transfer(config)) => Self {
                status: SessionStatus::Ok,
                protocol_version: Some(config.protocol_version),
                error: None,
                config: Some(config),
            },
            Ok(Completed::Listing) => Self {
                status: SessionStatus::Exit,
                protocol_version: driver.protocol_version,
                error: None,
                config: None,
            },
            Err(error) if error.is_reportable() && driver.module_selected => {
                warn!(%error, "handshake failed");
                let message = error.to_string();
                driver.report_error(&message);
                Self {
                    status: SessionStatus::Error,
                    protocol_version: driver.protocol_version,
                    error: Some(message),
                    config: None,
                }
            }
            Err(error) => {
                let _ = driver.channel.flush();
                return Err(error);
            }
        };

        driver.channel.flush()?;
        Ok(session)
    }

    /// The terminal status signalled to the peer.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// The negotiated protocol version, when the exchange got that far.
    #[must_use]
    pub const fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    /// The message echoed to the peer when the status is `Error`.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Borrows the transfer configuration (present only at status `Ok`).
    #[must_use]
    pub fn transfer_config(&self) -> Option<&TransferConfig> {
        self.config.as_ref()
    }

    /// Consumes the session, handing the configuration to the transfer phase.
    #[must_use]
    pub fn into_transfer_config(self) -> Option<TransferConfig> {
        self.config
    }
}

/// Outcome of a handshake run that did not error.
enum Completed {
    Transfer(TransferConfig),
    Listing,
}

/// Builder state mutated by the option handlers while parsing arguments.
#[derive(Debug, Default)]
struct SessionState {
    is_sender: bool,
    file_selection: FileSelection,
    incremental_recurse: bool,
    preserve_devices: bool,
    preserve_specials: bool,
    preserve_links: bool,
    preserve_permissions: bool,
    preserve_times: bool,
    preserve_user: bool,
    preserve_group: bool,
    numeric_ids: bool,
    ignore_times: bool,
    delete: bool,
    safe_file_list: bool,
    verbosity: u32,
}

struct Handshake<'a, R, W, M: ?Sized> {
    channel: DaemonChannel<R, W>,
    charset: Charset,
    modules: &'a M,
    checksum_seed: [u8; 4],
    protocol_version: Option<ProtocolVersion>,
    module_selected: bool,
}

impl<R: Read, W: Write, M: ModuleProvider + ?Sized> Handshake<'_, R, W, M> {
    fn run(&mut self) -> Result<Completed, HandshakeError> {
        let version = self.exchange_protocol_version()?;
        let module_name = self.read_line_string()?;

        if module_name.is_empty() {
            debug!("sending module listing and exiting");
            self.send_module_listing()?;
            self.send_status(SessionStatus::Exit)?;
            return Ok(Completed::Listing);
        }

        self.module_selected = true;
        let module = match self.modules.get(&module_name)? {
            ModuleEntry::Open(module) => module,
            ModuleEntry::Restricted(restricted) => self.unlock_module(restricted)?,
        };
        debug!(module = module.name(), "module selected");
        self.send_status(SessionStatus::Ok)?;
        self.channel.flush()?;

        let args = self.receive_arguments()?;
        debug!(?args, "parsing peer arguments");
        let config = self.parse_arguments(version, module, &args)?;

        self.send_compatibilities(&config);
        self.send_checksum_seed();
        Ok(Completed::Transfer(config))
    }

    /// Sends our greeting, reads the peer's, and settles on the lesser
    /// version of the two.
    fn exchange_protocol_version(&mut self) -> Result<ProtocolVersion, HandshakeError> {
        self.write_string(&format_greeting(ProtocolVersion::CURRENT))?;
        self.channel.flush()?;

        let line = self.read_line_string()?;
        let peer = parse_greeting(&line)?;
        let agreed = negotiate(ProtocolVersion::CURRENT, peer)?;
        trace!(%peer, %agreed, "protocol version negotiated");
        self.protocol_version = Some(agreed);
        Ok(agreed)
    }

    fn unlock_module(
        &mut self,
        restricted: RestrictedModule,
    ) -> Result<Module, HandshakeError> {
        let context = AuthContext::new().map_err(ChannelError::Io)?;
        self.write_string(&format!(
            "{} {}\n",
            SessionStatus::AuthReq,
            context.challenge()
        ))?;
        self.channel.flush()?;

        let response_line = self.read_line_string()?;
        let Some((user, response)) = response_line.split_once(' ') else {
            return Err(HandshakeError::Protocol(
                "invalid challenge response from peer".to_owned(),
            ));
        };

        // Unknown users still burn a comparison so the reply time does not
        // reveal whether the user exists.
        let authenticated = match restricted.authenticate(user, context.challenge()) {
            Some(expected) => auth::verify(&expected, response),
            None => {
                let _ = auth::verify(context.challenge(), response);
                false
            }
        };

        if !authenticated {
            return Err(HandshakeError::Security(format!(
                "failed to authenticate {user}"
            )));
        }

        trace!(user, module = restricted.name(), "module unlocked");
        Ok(restricted.into_module())
    }

    /// Writes the module listing: `%-15s` name, optional tab plus comment.
    fn send_module_listing(&mut self) -> Result<(), HandshakeError> {
        for module in self.modules.list() {
            let line = if module.comment().is_empty() {
                format!("{:<15}\n", module.name())
            } else {
                format!("{:<15}\t{}\n", module.name(), module.comment())
            };
            self.write_string(&line)?;
        }
        Ok(())
    }

    /// Reads NUL-terminated argument strings until the empty terminator.
    ///
    /// EOF before the terminator ends the list without error, matching
    /// upstream tolerance for peers that close early.
    fn receive_arguments(&mut self) -> Result<Vec<String>, HandshakeError> {
        let mut args = Vec::new();
        loop {
            let bytes = match self.channel.read_string_until_null_or_eof() {
                Ok(bytes) => bytes,
                Err(error @ ChannelError::Oversize { .. }) => {
                    return Err(HandshakeError::Protocol(error.to_string()));
                }
                Err(error) => return Err(error.into()),
            };
            if bytes.is_empty() {
                break;
            }
            args.push(self.charset.decode(&bytes)?);
        }
        Ok(args)
    }

    /// Parses the argument vector against the daemon's option schema and
    /// freezes the transfer configuration.
    fn parse_arguments(
        &mut self,
        version: ProtocolVersion,
        module: Module,
        args: &[String],
    ) -> Result<TransferConfig, HandshakeError> {
        let mut state = SessionState::default();
        let mut parser = server_option_schema();

        let mut unnamed = parser
            .parse(&mut state, args)
            .map_err(|error| HandshakeError::Protocol(error.to_string()))?;

        if state.file_selection == FileSelection::Recurse && !state.incremental_recurse {
            return Err(HandshakeError::Protocol(
                "recursion requires the incremental-recurse capability".to_owned(),
            ));
        }

        if !state.is_sender && !module.is_writable() {
            return Err(HandshakeError::Protocol(format!(
                "module {} is not writable",
                module.name()
            )));
        }

        if unnamed.len() < 2 {
            return Err(HandshakeError::Protocol(format!(
                "got too few unnamed arguments from peer ({}), expected \".\" and more",
                unnamed.len()
            )));
        }
        let dot_separator = unnamed.remove(0);
        if dot_separator != "." {
            return Err(HandshakeError::Protocol(format!(
                "expected first non-option argument to be \".\", received {dot_separator:?}"
            )));
        }

        let mut source_files = Vec::new();
        let mut receiver_destination = None;
        if state.is_sender {
            for name in &unnamed {
                if name.contains(['[', '*', '?']) {
                    return Err(HandshakeError::Protocol(format!(
                        "wildcards are not supported ({name})"
                    )));
                }
                let resolved = module
                    .resolve(name)
                    .map_err(|error| HandshakeError::Security(error.to_string()))?;
                source_files.push(resolved);
            }
            debug!(?source_files, "sender source files");
        } else {
            if unnamed.len() != 1 {
                return Err(HandshakeError::Protocol(format!(
                    "expected exactly one path argument, received {}",
                    unnamed.len()
                )));
            }
            let resolved = module
                .resolve(&unnamed[0])
                .map_err(|error| HandshakeError::Security(error.to_string()))?;
            debug!(destination = %resolved.display(), "receiver destination");
            receiver_destination = Some(resolved);
        }

        Ok(TransferConfig {
            role: if state.is_sender {
                Role::Sender
            } else {
                Role::Receiver
            },
            file_selection: state.file_selection,
            incremental_recurse: state.incremental_recurse,
            preserve_devices: state.preserve_devices,
            preserve_specials: state.preserve_specials,
            preserve_links: state.preserve_links,
            preserve_permissions: state.preserve_permissions,
            preserve_times: state.preserve_times,
            preserve_user: state.preserve_user,
            preserve_group: state.preserve_group,
            numeric_ids: state.numeric_ids,
            ignore_times: state.ignore_times,
            delete: state.delete,
            safe_file_list: state.safe_file_list,
            verbosity: state.verbosity,
            module,
            source_files,
            receiver_destination,
            checksum_seed: self.checksum_seed,
            charset: self.charset,
            protocol_version: version,
        })
    }

    /// Writes the single capability byte advertising what this side supports.
    fn send_compatibilities(&mut self, config: &TransferConfig) {
        let mut flags = CompatFlags::empty();
        if config.safe_file_list {
            flags |= CompatFlags::SAFE_FLIST;
        }
        if config.incremental_recurse {
            flags |= CompatFlags::INC_RECURSE;
        }
        trace!(flags = flags.bits(), "advertising compatibility flags");
        self.channel.put_byte(flags.bits());
    }

    /// Writes the 4-byte checksum seed.
    ///
    /// The seed is stored as the little-endian image of a 32-bit value; the
    /// wire carries that value's big-endian byte order. Peers observe the
    /// ordering, so it must not change.
    fn send_checksum_seed(&mut self) {
        self.channel
            .put_i32_le(i32::from_be_bytes(self.checksum_seed));
    }

    fn send_status(&mut self, status: SessionStatus) -> Result<(), HandshakeError> {
        self.write_string(&format!("{status}\n"))
    }

    /// Echoes a failure to the peer as `@ERROR: <message>`. Failures of the
    /// echo itself are ignored; the original error matters more.
    fn report_error(&mut self, message: &str) {
        let line = format!("{}: {}\n", SessionStatus::Error, message);
        if let Ok(bytes) = self.charset.encode(&line) {
            self.channel.put_bytes(&bytes);
        }
    }

    fn write_string(&mut self, text: &str) -> Result<(), HandshakeError> {
        let bytes = self.charset.encode(text)?;
        self.channel.put_bytes(&bytes);
        Ok(())
    }

    /// Reads one line, strips an optional trailing CR, and decodes it.
    fn read_line_string(&mut self) -> Result<String, HandshakeError> {
        let mut line = self.channel.read_line()?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(self.charset.decode(&line)?)
    }
}

/// Builds the option schema the daemon accepts from its peer.
///
/// The table mirrors what an rsync client sends after `--server`: the role
/// and recursion options, the `-e` capability token, and the preservation
/// flags. Handlers write into [`SessionState`]; their firing order is the
/// input order, which is what makes `--no-r` after `-r` effective.
fn server_option_schema() -> ArgumentParser<SessionState> {
    let mut parser = ArgumentParser::new();

    parser.add(OptionSpec::flag(PresencePolicy::Required, "server", None));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "sender",
        None,
        |state: &mut SessionState, _| {
            state.is_sender = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "recursive",
        Some('r'),
        |state: &mut SessionState, _| {
            state.file_selection = FileSelection::Recurse;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "no-r",
        None,
        |state: &mut SessionState, _| {
            // Sent when transferring dirs with delete; undoes -r only.
            if state.file_selection == FileSelection::Recurse {
                state.file_selection = FileSelection::Exact;
            }
            Ok(())
        },
    ));
    parser.add(OptionSpec::string_with(
        PresencePolicy::Required,
        "rsh",
        Some('e'),
        |state: &mut SessionState, value| {
            let token = value.unwrap_or_default();
            let capabilities = PeerCapabilities::parse(token)
                .map_err(|error| ArgParseError::Invalid(error.to_string()))?;
            if capabilities.incremental_recurse() {
                state.incremental_recurse = true;
            }
            state.safe_file_list = capabilities.safe_file_list();
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "ignore-times",
        Some('I'),
        |state: &mut SessionState, _| {
            state.ignore_times = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "verbose",
        Some('v'),
        |state: &mut SessionState, _| {
            state.verbosity += 1;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "delete",
        None,
        |state: &mut SessionState, _| {
            state.delete = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "",
        Some('D'),
        |state: &mut SessionState, _| {
            state.preserve_devices = true;
            state.preserve_specials = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "specials",
        None,
        |state: &mut SessionState, _| {
            state.preserve_specials = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "no-specials",
        None,
        |state: &mut SessionState, _| {
            state.preserve_specials = false;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "links",
        Some('l'),
        |state: &mut SessionState, _| {
            state.preserve_links = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "owner",
        Some('o'),
        |state: &mut SessionState, _| {
            state.preserve_user = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "group",
        Some('g'),
        |state: &mut SessionState, _| {
            state.preserve_group = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "numeric-ids",
        None,
        |state: &mut SessionState, _| {
            state.numeric_ids = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "perms",
        Some('p'),
        |state: &mut SessionState, _| {
            state.preserve_permissions = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "times",
        Some('t'),
        |state: &mut SessionState, _| {
            state.preserve_times = true;
            Ok(())
        },
    ));
    parser.add(OptionSpec::flag_with(
        PresencePolicy::Optional,
        "dirs",
        Some('d'),
        |state: &mut SessionState, _| {
            state.file_selection = FileSelection::TransferDirs;
            Ok(())
        },
    ));

    parser
}

/// Draws the per-session checksum seed from the secure random source.
///
/// The four bytes are the little-endian image of a random 32-bit value.
fn generate_checksum_seed() -> io::Result<[u8; 4]> {
    let mut seed = [0u8; 4];
    getrandom::fill(&mut seed)?;
    Ok(seed)
}
