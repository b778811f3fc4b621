use super::handlers::{auth, health};
use utoipa::openapi::{
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that serves every documented endpoint and drives the `OpenAPI` document.
///
/// New endpoints go here via `.routes(routes!(...))` so they are served and
/// documented together.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::login::verify_second_factor))
        .routes(routes!(auth::login::me))
        .routes(routes!(auth::login::logout))
        .routes(routes!(auth::sessions::list))
        .routes(routes!(auth::sessions::terminate_all))
        .routes(routes!(auth::sessions::terminate))
        .routes(routes!(auth::two_factor::setup))
        .routes(routes!(auth::two_factor::verify_setup))
        .routes(routes!(auth::two_factor::disable))
        .routes(routes!(auth::two_factor::regenerate_backup_codes))
        .routes(routes!(auth::two_factor::status))
        .routes(routes!(auth::qr_auth::create_session))
        .routes(routes!(auth::qr_auth::session_status))
        .routes(routes!(auth::qr_auth::session_details))
        .routes(routes!(auth::qr_auth::approve))
        .routes(routes!(auth::qr_auth::reject))
        .routes(routes!(auth::qr_auth::register_device))
        .routes(routes!(auth::qr_auth::enable))
        .routes(routes!(auth::qr_auth::status))
        .routes(routes!(auth::qr_auth::disable))
        .routes(routes!(auth::qr_auth::check_enabled));

    router.get_openapi_mut().tags = Some(vec![
        tag("auth", "Password login, second-factor verification and sessions"),
        tag("two-factor", "TOTP enrollment and backup codes"),
        tag("qr-auth", "Login approval from a registered device"),
        tag("health", "Liveness"),
    ]);

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|id| {
        let mut license = License::new(id);
        license.identifier = Some(id.to_string());
        license
    });

    let components = ComponentsBuilder::new()
        .security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("opaque")
                    .build(),
            ),
        )
        .build();

    OpenApiBuilder::new()
        .info(info)
        .components(Some(components))
        .build()
}

/// First Cargo author, given as `Name <email>` or just a name.
fn cargo_contact(authors: &str) -> Option<Contact> {
    let primary = non_empty(authors.split(':').next()?)?;
    let (name, email) = match primary.split_once('<') {
        Some((name, rest)) => (non_empty(name), non_empty(rest.trim_end_matches('>'))),
        None => (Some(primary), None),
    };
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}
