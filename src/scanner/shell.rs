use ssh2::{MethodType, Session};
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use thiserror::Error;

// Old OpenWrt builds ship dropbear versions that only speak the legacy end
// of these lists; the modern algorithms stay in front so current firmware
// negotiates them.
const KEX_ALGORITHMS: &str = "curve25519-sha256,curve25519-sha256@libssh.org,\
ecdh-sha2-nistp256,ecdh-sha2-nistp384,ecdh-sha2-nistp521,\
diffie-hellman-group-exchange-sha256,diffie-hellman-group14-sha1,\
diffie-hellman-group-exchange-sha1,diffie-hellman-group1-sha1";

const HOST_KEY_ALGORITHMS: &str =
    "ssh-ed25519,ecdsa-sha2-nistp256,rsa-sha2-512,rsa-sha2-256,ssh-rsa,ssh-dss";

const CIPHERS: &str = "aes128-ctr,aes192-ctr,aes256-ctr,\
aes256-cbc,aes192-cbc,aes128-cbc,3des-cbc,arcfour128,arcfour";

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("invalid address {0}")]
    Address(String),
    #[error("tcp connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("ssh negotiation failed: {0}")]
    Negotiation(#[source] ssh2::Error),
    #[error("authentication failed: {0}")]
    Auth(#[source] ssh2::Error),
    #[error("channel error: {0}")]
    Channel(#[source] ssh2::Error),
    #[error("command timed out")]
    Timeout,
    #[error("shell task failed: {0}")]
    Task(String),
}

/// Username plus one of password or private-key material. The key wins when
/// both are present.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>, key: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
            private_key: key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Exit 0 with something on stdout. The fallback chains key off this.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.stdout.trim().is_empty()
    }
}

/// Interactive SSH session. All calls block; callers drive this through
/// `tokio::task::spawn_blocking` and put their outer deadline on the future.
pub struct ShellSession {
    session: Session,
}

impl ShellSession {
    pub fn open(
        ip: &str,
        port: u16,
        creds: &Credentials,
        budget: Duration,
    ) -> Result<Self, ShellError> {
        let addr: SocketAddr = format!("{}:{}", ip, port)
            .parse()
            .map_err(|_| ShellError::Address(format!("{}:{}", ip, port)))?;

        let stream = TcpStream::connect_timeout(&addr, budget).map_err(ShellError::Connect)?;
        let _ = stream.set_read_timeout(Some(budget));
        let _ = stream.set_write_timeout(Some(budget));

        let mut session = Session::new().map_err(ShellError::Negotiation)?;
        session.set_timeout(budget.as_millis() as u32);
        session
            .method_pref(MethodType::Kex, KEX_ALGORITHMS)
            .map_err(ShellError::Negotiation)?;
        session
            .method_pref(MethodType::HostKey, HOST_KEY_ALGORITHMS)
            .map_err(ShellError::Negotiation)?;
        session
            .method_pref(MethodType::CryptCs, CIPHERS)
            .map_err(ShellError::Negotiation)?;
        session
            .method_pref(MethodType::CryptSc, CIPHERS)
            .map_err(ShellError::Negotiation)?;

        session.set_tcp_stream(stream);
        session.handshake().map_err(ShellError::Negotiation)?;

        if let Some(key) = creds.private_key.as_deref() {
            session
                .userauth_pubkey_memory(&creds.username, None, key, None)
                .map_err(ShellError::Auth)?;
        } else {
            let password = creds.password.as_deref().unwrap_or("");
            session
                .userauth_password(&creds.username, password)
                .map_err(ShellError::Auth)?;
        }

        Ok(Self { session })
    }

    /// Run one command and capture its output. A timeout ends the command
    /// but leaves the session usable for the next one.
    pub fn run(&mut self, command: &str, budget: Duration) -> Result<CommandOutput, ShellError> {
        self.session.set_timeout(budget.as_millis() as u32);

        let mut channel = self.session.channel_session().map_err(ShellError::Channel)?;
        channel.exec(command).map_err(ShellError::Channel)?;

        let mut stdout = String::new();
        if let Err(e) = channel.read_to_string(&mut stdout) {
            let _ = channel.close();
            return Err(match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    ShellError::Timeout
                }
                _ => ShellError::Task(e.to_string()),
            });
        }

        let mut stderr = String::new();
        let _ = channel.stderr().read_to_string(&mut stderr);

        let _ = channel.wait_close();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Idempotent; the transport is also torn down on drop.
    pub fn close(&mut self) {
        let _ = self
            .session
            .disconnect(None, "session closed", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_success_requires_output() {
        let empty = CommandOutput {
            exit_code: 0,
            stdout: "  \n".into(),
            stderr: String::new(),
        };
        assert!(!empty.succeeded());

        let failed = CommandOutput {
            exit_code: 1,
            stdout: "data".into(),
            stderr: String::new(),
        };
        assert!(!failed.succeeded());

        let ok = CommandOutput {
            exit_code: 0,
            stdout: "OpenWrt".into(),
            stderr: String::new(),
        };
        assert!(ok.succeeded());
    }

    #[test]
    fn open_refuses_malformed_address() {
        let creds = Credentials::new("root", Some("x".into()), None);
        let result = ShellSession::open("bogus host", 22, &creds, Duration::from_millis(100));
        assert!(matches!(result, Err(ShellError::Address(_))));
    }
}
