use hmac::{Hmac, Mac};
use sha2::Sha256;
use sheen::configuration::{get_configuration, DatabaseSettings, Settings};
use sheen::helpers::KvManager;
use sqlx::{Connection, Executor, PgConnection, PgPool};

pub async fn spawn_app() -> Option<TestApp> {
    let configuration = get_configuration().expect("Failed to get configuration");
    spawn_app_with_configuration(configuration).await
}

pub async fn spawn_app_with_configuration(mut configuration: Settings) -> Option<TestApp> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();

    let connection_pool = match configure_database(&configuration.database).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("Skipping tests: failed to connect to postgres: {}", err);
            return None;
        }
    };

    let kv = match KvManager::try_new(configuration.redis.connection_string()).await {
        Ok(kv) => kv,
        Err(err) => {
            eprintln!("Skipping tests: failed to connect to redis: {}", err);
            return None;
        }
    };

    let shared_secret = configuration.shared_secret.clone();
    let server = sheen::startup::run(listener, connection_pool.clone(), kv, configuration)
        .await
        .expect("Failed to bind address.");

    let _ = tokio::spawn(server);
    println!("Used Port: {}", port);

    Some(TestApp {
        address,
        db_pool: connection_pool,
        shared_secret,
    })
}

pub async fn configure_database(config: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let mut connection = PgConnection::connect(&config.connection_string_without_db()).await?;

    connection
        .execute(format!(r#"CREATE DATABASE "{}""#, config.database_name).as_str())
        .await?;

    let connection_pool = PgPool::connect(&config.connection_string()).await?;

    sqlx::migrate!("./migrations").run(&connection_pool).await?;

    Ok(connection_pool)
}

/// A database-only harness for tests that never touch the HTTP surface.
pub async fn spawn_db() -> Option<PgPool> {
    let mut configuration = get_configuration().expect("Failed to get configuration");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    match configure_database(&configuration.database).await {
        Ok(pool) => Some(pool),
        Err(err) => {
            eprintln!("Skipping tests: failed to connect to postgres: {}", err);
            None
        }
    }
}

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub shared_secret: String,
}

impl TestApp {
    /// Builds the four auth headers for a signed request.
    pub fn sign(&self, caller: &str, method: &str, path: &str, body: &[u8]) -> SignedHeaders {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = uuid::Uuid::new_v4().to_string();

        let mut mac = Hmac::<Sha256>::new_from_slice(self.shared_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(format!("{caller}.{timestamp}.{nonce}.{method}.{path}.").as_bytes());
        mac.update(body);
        let signature = format!("{:x}", mac.finalize().into_bytes());

        SignedHeaders {
            caller: caller.to_string(),
            timestamp,
            nonce,
            signature,
        }
    }

    pub async fn post(
        &self,
        caller: &str,
        path: &str,
        body: serde_json::Value,
    ) -> reqwest::Response {
        let body = serde_json::to_vec(&body).unwrap();
        let headers = self.sign(caller, "POST", path, &body);
        reqwest::Client::new()
            .post(format!("{}{}", self.address, path))
            .header("content-type", "application/json")
            .header("x-sheen-caller", headers.caller)
            .header("x-sheen-timestamp", headers.timestamp.to_string())
            .header("x-sheen-nonce", headers.nonce)
            .header("x-sheen-signature", headers.signature)
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, caller: &str, path: &str) -> reqwest::Response {
        // Only the path is signed, never the query string.
        let sign_path = path.split('?').next().unwrap_or(path);
        let headers = self.sign(caller, "GET", sign_path, b"");
        reqwest::Client::new()
            .get(format!("{}{}", self.address, path))
            .header("x-sheen-caller", headers.caller)
            .header("x-sheen-timestamp", headers.timestamp.to_string())
            .header("x-sheen-nonce", headers.nonce)
            .header("x-sheen-signature", headers.signature)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

pub struct SignedHeaders {
    pub caller: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}
