use crate::configuration::Settings;
use crate::helpers::KvManager;
use crate::middleware;
use crate::routes;
use crate::streaming::StreamHub;
use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

pub async fn run(
    listener: TcpListener,
    pg_pool: Pool<Postgres>,
    kv: KvManager,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let settings = web::Data::new(settings);
    let pg_pool = web::Data::new(pg_pool);
    let kv = web::Data::new(kv);
    let stream_hub = web::Data::new(StreamHub::new());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(middleware::authentication::Manager::new())
            .wrap(Cors::permissive())
            .service(web::scope("/health_check").route("", web::get().to(routes::health_check)))
            .service(
                web::scope("/builds")
                    .service(routes::build::create::add)
                    .service(routes::build::events::list)
                    .service(routes::build::status::item)
                    .service(routes::build::rollback::add),
            )
            .service(web::scope("/stream").service(routes::stream::subscribe))
            .service(
                web::scope("/webhooks")
                    .service(routes::webhook::add::add)
                    .service(routes::webhook::list::list)
                    .service(routes::webhook::delete::item)
                    .service(routes::webhook::replay::add),
            )
            .service(
                web::scope("/admin")
                    .service(routes::admin::events)
                    .service(routes::admin::dead_jobs)
                    .service(routes::admin::fail),
            )
            .app_data(pg_pool.clone())
            .app_data(kv.clone())
            .app_data(settings.clone())
            .app_data(stream_hub.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
